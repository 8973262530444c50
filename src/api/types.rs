use crate::hub::EndpointSnapshot;
use crate::transfer::TransferSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime: i64,
    pub connected_clients: usize,
    pub active_downloads: usize,
    pub version: &'static str,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsListResponse {
    pub success: bool,
    pub clients: Vec<EndpointSnapshot>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetail {
    #[serde(flatten)]
    pub endpoint: EndpointSnapshot,
    pub download_history: Vec<TransferSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetailResponse {
    pub success: bool,
    pub client: ClientDetail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadRequest {
    pub client_id: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadResponse {
    pub success: bool,
    pub request_id: String,
    pub client_id: String,
    pub file_path: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadsQuery {
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadsListResponse {
    pub success: bool,
    pub downloads: Vec<TransferSnapshot>,
    pub total: usize,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub success: bool,
    #[serde(flatten)]
    pub transfer: TransferSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDownloadResponse {
    pub success: bool,
    pub request_id: String,
    pub status: &'static str,
}
