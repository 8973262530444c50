use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    InProgress { progress: u8 },
    Completed,
    Failed { reason: String },
    Cancelled { reason: String },
}

impl TransferState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransferState::Pending | TransferState::InProgress { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed { .. } | TransferState::Cancelled { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferState::Pending => "pending",
            TransferState::InProgress { .. } => "in_progress",
            TransferState::Completed => "completed",
            TransferState::Failed { .. } => "failed",
            TransferState::Cancelled { .. } => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    AckSuccess {
        file_size: u64,
        total_chunks: u32,
        file_checksum: String,
    },
    AckFailure {
        reason: String,
    },
    ChunkProgress {
        percent: u8,
    },
    Complete,
    Fail {
        reason: String,
    },
    Cancel {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetriedChunk {
    pub chunk_index: u32,
    pub attempts: u32,
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub percentage: u8,
    pub bytes_received: u64,
    pub retried_chunks: Vec<RetriedChunk>,
}

/// A transfer's terminal (or ack-reported) error, surfaced over the control
/// plane with the same `code` vocabulary as the HTTP error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub request_id: String,
    pub client_id: String,
    pub file_path: String,
    pub status: String,
    pub progress: Option<TransferProgress>,
    #[serde(rename = "startedAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "duration")]
    pub duration_ms: Option<i64>,
    pub error: Option<TransferErrorInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
