//! Wire protocol exchanged over the endpoint-facing WebSocket connection.
//! Every frame is one JSON object; `type` selects the payload shape.

use serde::{Deserialize, Serialize};

pub const CHUNK_SIZE: usize = 1_048_576;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Messages an endpoint sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "REGISTER")]
    Register {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename = "DOWNLOAD_ACK")]
    DownloadAck {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(rename = "fileSize", default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
        #[serde(rename = "totalChunks", default, skip_serializing_if = "Option::is_none")]
        total_chunks: Option<u32>,
        #[serde(rename = "fileChecksum", default, skip_serializing_if = "Option::is_none")]
        file_checksum: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    #[serde(rename = "FILE_CHUNK")]
    FileChunk {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u32,
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
        data: String,
        checksum: String,
        size: u64,
    },
    #[serde(rename = "DOWNLOAD_COMPLETE")]
    DownloadComplete {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
        #[serde(rename = "fileChecksum")]
        file_checksum: String,
        message: String,
    },
    #[serde(rename = "PING")]
    Ping { timestamp: chrono::DateTime<chrono::Utc> },
    #[serde(rename = "PONG")]
    Pong { timestamp: chrono::DateTime<chrono::Utc> },
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
}

/// Messages the hub sends to an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "REGISTER_ACK")]
    RegisterAck { success: bool, message: String },
    #[serde(rename = "DOWNLOAD_REQUEST")]
    DownloadRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "filePath")]
        file_path: String,
    },
    #[serde(rename = "RETRY_CHUNK")]
    RetryChunk {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u32,
        attempt: u32,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    #[serde(rename = "CANCEL_DOWNLOAD")]
    CancelDownload {
        #[serde(rename = "requestId")]
        request_id: String,
        reason: String,
    },
    #[serde(rename = "PING")]
    Ping { timestamp: chrono::DateTime<chrono::Utc> },
    #[serde(rename = "PONG")]
    Pong { timestamp: chrono::DateTime<chrono::Utc> },
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
}
