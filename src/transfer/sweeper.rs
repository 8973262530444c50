use crate::transfer::manager::TransferManager;
use std::sync::Arc;
use std::time::Duration;

/// Periodically evicts terminal transfers older than `retention`. Runs for
/// the lifetime of the hub process; cancel by dropping its `JoinHandle`.
pub fn spawn(
    manager: Arc<TransferManager>,
    sweep_interval: Duration,
    retention: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let evicted = manager.sweep(retention);
            if evicted > 0 {
                tracing::info!(evicted, "swept terminal transfers");
            }
        }
    })
}
