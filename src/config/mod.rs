use clap::Parser;
use std::path::PathBuf;

/// Hub runtime configuration. Every field is settable as a CLI flag or an
/// environment variable of the same name (`--http-port` / `HTTP_PORT`);
/// flags take precedence over the environment, which takes precedence over
/// these defaults.
#[derive(Debug, Clone, Parser)]
#[command(name = "hub", about = "RESILIENT-style on-demand file retrieval hub")]
pub struct Config {
    #[arg(long, env = "HTTP_PORT", default_value_t = 3000)]
    pub http_port: u16,

    #[arg(long, env = "WS_PORT", default_value_t = 8080)]
    pub ws_port: u16,

    #[arg(long, env = "DOWNLOAD_DIR", default_value = "./downloads")]
    pub download_dir: PathBuf,

    #[arg(long, env = "MAX_CHUNK_RETRY_ATTEMPTS", default_value_t = 3)]
    pub max_chunk_retry_attempts: u32,

    #[arg(long, env = "CHUNK_RETRY_BASE_DELAY_MS", default_value_t = 1000)]
    pub chunk_retry_base_delay_ms: u64,

    #[arg(long, env = "CHUNK_ARRIVAL_TIMEOUT_MS", default_value_t = 30_000)]
    pub chunk_arrival_timeout_ms: u64,

    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 30_000)]
    pub heartbeat_interval_ms: u64,

    #[arg(long, env = "STALE_TIMEOUT_MS", default_value_t = 90_000)]
    pub stale_timeout_ms: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// How often the terminal-transfer sweeper runs, independent of the
    /// heartbeat interval.
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// How long a terminal transfer is retained before the sweeper evicts
    /// it from memory.
    #[arg(long, env = "TRANSFER_RETENTION_HOURS", default_value_t = 24)]
    pub transfer_retention_hours: i64,
}

impl Config {
    pub fn tracker_config(&self) -> crate::tracker::TrackerConfig {
        crate::tracker::TrackerConfig {
            max_attempts: self.max_chunk_retry_attempts,
            base_delay: std::time::Duration::from_millis(self.chunk_retry_base_delay_ms),
            max_delay: std::time::Duration::from_secs(30),
            arrival_timeout: std::time::Duration::from_millis(self.chunk_arrival_timeout_ms),
        }
    }

    pub fn heartbeat_config(&self) -> crate::hub::HeartbeatConfig {
        crate::hub::HeartbeatConfig {
            interval: std::time::Duration::from_millis(self.heartbeat_interval_ms),
            stale_timeout: std::time::Duration::from_millis(self.stale_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let config = Config::parse_from(["hub"]);
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.ws_port, 8080);
        assert_eq!(config.max_chunk_retry_attempts, 3);
        assert_eq!(config.chunk_retry_base_delay_ms, 1000);
        assert_eq!(config.chunk_arrival_timeout_ms, 30_000);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.stale_timeout_ms, 90_000);
    }

    #[test]
    fn test_cli_flag_overrides_default() {
        let config = Config::parse_from(["hub", "--http-port", "4000"]);
        assert_eq!(config.http_port, 4000);
    }
}
