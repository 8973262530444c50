use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureReason {
    ChecksumMismatch,
    ArrivalTimeout,
    MissingAtComplete,
    WriteError,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::ChecksumMismatch => "checksum-mismatch",
            FailureReason::ArrivalTimeout => "arrival-timeout",
            FailureReason::MissingAtComplete => "missing-at-complete",
            FailureReason::WriteError => "write-error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub chunk_index: u32,
    pub attempts: u32,
    pub last_attempt_at: chrono::DateTime<chrono::Utc>,
    pub status: ChunkStatus,
    pub reason: Option<FailureReason>,
}

/// Config governing retry backoff and timeout windows; mirrors the
/// `HUB_*` environment keys.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub max_attempts: u32,
    pub base_delay: std::time::Duration,
    pub max_delay: std::time::Duration,
    pub arrival_timeout: std::time::Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1000),
            max_delay: std::time::Duration::from_secs(30),
            arrival_timeout: std::time::Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    ArrivalTimeout {
        transfer_id: String,
        chunk_index: u32,
    },
    RetryDue {
        transfer_id: String,
        chunk_index: u32,
        attempt: u32,
        reason: FailureReason,
    },
    MaxRetriesExceeded {
        transfer_id: String,
        chunk_index: u32,
        attempts: u32,
        reason: FailureReason,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryInfo {
    pub total_chunks: u32,
    pub received: usize,
    pub retried_chunks: Vec<LedgerEntry>,
}
