use crate::hub::registry::EndpointRegistry;
use crate::protocol::ServerMessage;
use crate::tracker::{ChunkTracker, FailureReason, TrackerEvent};
use crate::transfer::TransferManager;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drains [`TrackerEvent`]s and turns them into outbound RETRY_CHUNK
/// messages or terminal transfer failures. Runs for the hub's lifetime.
pub fn spawn(
    mut events: mpsc::UnboundedReceiver<TrackerEvent>,
    tracker: ChunkTracker,
    manager: Arc<TransferManager>,
    registry: EndpointRegistry,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TrackerEvent::ArrivalTimeout {
                    transfer_id,
                    chunk_index,
                } => {
                    let _ = tracker.mark_failed(
                        &transfer_id,
                        chunk_index,
                        FailureReason::ArrivalTimeout,
                    );
                }
                TrackerEvent::RetryDue {
                    transfer_id,
                    chunk_index,
                    attempt,
                    reason,
                } => {
                    if let Some(endpoint_id) = manager.endpoint_of(&transfer_id) {
                        let _ = registry.send_to(
                            &endpoint_id,
                            ServerMessage::RetryChunk {
                                request_id: transfer_id,
                                chunk_index,
                                attempt,
                                reason: reason.to_string(),
                                timestamp: chrono::Utc::now(),
                            },
                        );
                    }
                }
                TrackerEvent::MaxRetriesExceeded {
                    transfer_id,
                    chunk_index,
                    attempts,
                    reason,
                } => {
                    tracing::warn!(transfer_id, chunk_index, attempts, %reason, "chunk retries exhausted");
                    let _ = manager
                        .fail_with(
                            &transfer_id,
                            &format!(
                                "chunk {chunk_index} exceeded max retry attempts ({attempts}): {reason}"
                            ),
                            "CHUNK_TRANSFER_FAILED",
                            Some(serde_json::json!({ "chunkIndex": chunk_index })),
                        )
                        .await;
                }
            }
        }
    })
}
