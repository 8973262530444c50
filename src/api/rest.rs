use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::hub::EndpointRegistry;
use crate::protocol::ServerMessage;
use crate::transfer::{TransferFilter, TransferManager};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub registry: EndpointRegistry,
    pub manager: Arc<TransferManager>,
    pub started_at: Instant,
}

pub struct RestApi {
    state: AppState,
}

impl RestApi {
    pub fn new(registry: EndpointRegistry, manager: Arc<TransferManager>) -> Self {
        Self {
            state: AppState {
                registry,
                manager,
                started_at: Instant::now(),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/health", get(health_check))
            .route("/api/v1/clients", get(list_clients))
            .route("/api/v1/clients/:id", get(get_client))
            .route("/api/v1/downloads", post(create_download))
            .route("/api/v1/downloads", get(list_downloads))
            .route("/api/v1/downloads/:id", get(get_download))
            .route("/api/v1/downloads/:id", axum::routing::delete(cancel_download))
            .with_state(self.state.clone())
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_downloads = state
        .manager
        .list(TransferFilter::default())
        .into_iter()
        .filter(|t| t.status == "pending" || t.status == "in_progress")
        .count();

    Json(HealthResponse {
        status: "healthy",
        uptime: state.started_at.elapsed().as_secs() as i64,
        connected_clients: state.registry.list().len(),
        active_downloads,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ClientsQuery>,
) -> Json<ClientsListResponse> {
    let mut clients = state.registry.list();
    if let Some(status) = query.status {
        clients.retain(|c| c.status == status);
    }
    let total = clients.len();
    Json(ClientsListResponse {
        success: true,
        clients,
        total,
    })
}

async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<ClientDetailResponse>> {
    let endpoint = state
        .registry
        .get(&client_id)
        .ok_or_else(|| ApiError::ClientNotFound(client_id.clone()))?;

    let download_history = state.manager.list(TransferFilter {
        client_id: Some(client_id),
        ..Default::default()
    });

    Ok(Json(ClientDetailResponse {
        success: true,
        client: ClientDetail {
            endpoint,
            download_history,
        },
    }))
}

async fn create_download(
    State(state): State<AppState>,
    Json(req): Json<CreateDownloadRequest>,
) -> ApiResult<(StatusCode, Json<CreateDownloadResponse>)> {
    if req.client_id.trim().is_empty() || req.file_path.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "clientId and filePath are required".to_string(),
        ));
    }

    if !state.registry.is_connected(&req.client_id) {
        return Err(ApiError::ClientNotConnected(req.client_id));
    }

    if state.manager.has_active_for_endpoint(&req.client_id) {
        return Err(ApiError::DownloadInProgress(req.client_id));
    }

    let request_id = state.manager.create(&req.client_id, &req.file_path, None)?;

    if state
        .registry
        .send_to(
            &req.client_id,
            ServerMessage::DownloadRequest {
                request_id: request_id.clone(),
                client_id: req.client_id.clone(),
                file_path: req.file_path.clone(),
            },
        )
        .is_err()
    {
        let _ = state.manager.fail(&request_id, "endpoint disconnected before dispatch").await;
        return Err(ApiError::ClientNotConnected(req.client_id));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDownloadResponse {
            success: true,
            request_id,
            client_id: req.client_id,
            file_path: req.file_path,
            status: "pending",
        }),
    ))
}

async fn list_downloads(
    State(state): State<AppState>,
    Query(query): Query<DownloadsQuery>,
) -> Json<DownloadsListResponse> {
    let limit = query.limit;
    let offset = query.offset;
    let downloads = state.manager.list(TransferFilter {
        status: query.status,
        client_id: query.client_id,
        limit,
        offset,
    });
    Json(DownloadsListResponse {
        success: true,
        total: downloads.len(),
        downloads,
        limit,
        offset,
    })
}

async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    uuid::Uuid::parse_str(&id).map_err(|_| ApiError::InvalidRequest("invalid requestId".to_string()))?;
    let transfer = state.manager.get(&id)?;
    Ok(Json(DownloadResponse {
        success: true,
        transfer,
    }))
}

async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelDownloadResponse>> {
    uuid::Uuid::parse_str(&id).map_err(|_| ApiError::InvalidRequest("invalid requestId".to_string()))?;
    let reason = "cancelled by operator";
    let endpoint_id = state.manager.endpoint_of(&id);
    state.manager.cancel(&id, reason).await?;

    if let Some(endpoint_id) = endpoint_id {
        let _ = state.registry.send_to(
            &endpoint_id,
            ServerMessage::CancelDownload {
                request_id: id.clone(),
                reason: reason.to_string(),
            },
        );
    }

    Ok(Json(CancelDownloadResponse {
        success: true,
        request_id: id,
        status: "cancelled",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{ChunkTracker, TrackerConfig};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::Service;

    fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let (tracker, _rx) = ChunkTracker::new(TrackerConfig::default());
        let manager = Arc::new(TransferManager::new(dir.path().to_path_buf(), tracker));
        (
            AppState {
                registry: EndpointRegistry::new(),
                manager,
                started_at: Instant::now(),
            },
            dir,
        )
    }

    #[tokio::test]
    async fn test_health_check() {
        let (state, _dir) = test_state();
        let mut app = RestApi { state }.router();

        let request = Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_create_download_rejects_disconnected_client() {
        let (state, _dir) = test_state();
        let mut app = RestApi { state }.router();

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/downloads")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"clientId":"edge-001","filePath":"/data/x.txt"}"#))
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_download_rejects_malformed_id() {
        let (state, _dir) = test_state();
        let mut app = RestApi { state }.router();

        let request = Request::builder()
            .uri("/api/v1/downloads/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_unknown_download_returns_404() {
        let (state, _dir) = test_state();
        let mut app = RestApi { state }.router();

        let id = uuid::Uuid::new_v4().to_string();
        let request = Request::builder()
            .uri(format!("/api/v1/downloads/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
