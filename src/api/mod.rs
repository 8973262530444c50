mod error;
mod rest;
mod types;

pub use error::{ApiError, ApiResult};
pub use rest::{AppState, RestApi};
pub use types::*;

use crate::hub::EndpointRegistry;
use crate::transfer::TransferManager;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the HTTP control plane: health, client inspection, and download
/// lifecycle routes, permissively CORS-enabled for operator dashboards.
pub fn create_control_plane(registry: EndpointRegistry, manager: Arc<TransferManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    RestApi::new(registry, manager)
        .router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{ChunkTracker, TrackerConfig};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_control_plane_builds() {
        let dir = TempDir::new().unwrap();
        let (tracker, _rx) = ChunkTracker::new(TrackerConfig::default());
        let manager = Arc::new(TransferManager::new(dir.path().to_path_buf(), tracker));
        let _app = create_control_plane(EndpointRegistry::new(), manager);
    }
}
