use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    pub client_id: String,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
}

/// Config governing heartbeat liveness; mirrors `HEARTBEAT_INTERVAL_MS` /
/// `STALE_TIMEOUT_MS`.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: std::time::Duration,
    pub stale_timeout: std::time::Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(30),
            stale_timeout: std::time::Duration::from_secs(90),
        }
    }
}
