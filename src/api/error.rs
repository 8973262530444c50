use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("client not connected: {0}")]
    ClientNotConnected(String),

    #[error("download not found: {0}")]
    DownloadNotFound(String),

    #[error("endpoint already has an active download: {0}")]
    DownloadInProgress(String),

    #[error("download is already in a terminal state: {0}")]
    DownloadTerminal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal server error: {0}")]
    InternalError(String),
}

impl From<crate::transfer::TransferError> for ApiError {
    fn from(error: crate::transfer::TransferError) -> Self {
        use crate::transfer::TransferError::*;
        match error {
            NotFound(id) => ApiError::DownloadNotFound(id),
            AlreadyExists(id) => ApiError::DownloadInProgress(id),
            AlreadyTerminal(id) => ApiError::DownloadTerminal(id),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::ClientNotFound(m) => (StatusCode::NOT_FOUND, "CLIENT_NOT_FOUND", m.clone()),
            ApiError::ClientNotConnected(m) => {
                (StatusCode::NOT_FOUND, "CLIENT_NOT_CONNECTED", m.clone())
            }
            ApiError::DownloadNotFound(m) => {
                (StatusCode::NOT_FOUND, "DOWNLOAD_NOT_FOUND", m.clone())
            }
            ApiError::DownloadInProgress(m) => {
                (StatusCode::CONFLICT, "DOWNLOAD_IN_PROGRESS", m.clone())
            }
            ApiError::DownloadTerminal(m) => {
                (StatusCode::CONFLICT, "DOWNLOAD_ALREADY_TERMINAL", m.clone())
            }
            ApiError::InvalidRequest(m) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", m.clone()),
            ApiError::InternalError(m) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", m.clone())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
                "timestamp": chrono::Utc::now(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
