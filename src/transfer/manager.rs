use crate::checksum;
use crate::tracker::{ChunkTracker, FailureReason};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::state_machine::TransferStateMachine;
use crate::transfer::types::{
    RetriedChunk, TransferErrorInfo, TransferEvent, TransferFilter, TransferProgress,
    TransferSnapshot,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

pub const CHUNK_SIZE: u64 = crate::protocol::CHUNK_SIZE as u64;

/// Outcome of handing one inbound FILE_CHUNK message to the manager.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Ok { first_time: bool },
    Retry { reason: FailureReason, attempt: u32 },
    MaxRetriesExceeded { attempts: u32 },
}

struct Transfer {
    id: String,
    endpoint_id: String,
    remote_path: String,
    state: TransferStateMachine,
    file_size: RwLock<Option<u64>>,
    total_chunks: RwLock<Option<u32>>,
    file_checksum: RwLock<Option<String>>,
    scratch_path: PathBuf,
    output_path: RwLock<Option<PathBuf>>,
    scratch_file: AsyncMutex<Option<File>>,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
    completed_at: RwLock<Option<DateTime<Utc>>>,
    error: RwLock<Option<TransferErrorInfo>>,
}

impl Transfer {
    fn touch(&self) {
        *self.updated_at.write() = Utc::now();
    }
}

/// Owns every transfer's lifecycle: state machine, scratch file, and the
/// derived snapshot the control plane reads. Chunk-level bookkeeping is
/// delegated to the [`ChunkTracker`].
pub struct TransferManager {
    transfers: DashMap<String, Arc<Transfer>>,
    tracker: ChunkTracker,
    download_dir: PathBuf,
    scratch_dir: PathBuf,
    keep_failed_scratch: bool,
}

impl TransferManager {
    pub fn new(download_dir: PathBuf, tracker: ChunkTracker) -> Self {
        let scratch_dir = download_dir.join(".tmp");
        Self {
            transfers: DashMap::new(),
            tracker,
            download_dir,
            scratch_dir,
            keep_failed_scratch: true,
        }
    }

    pub async fn ensure_directories(&self) -> TransferResult<()> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        Ok(())
    }

    /// Creates a new transfer in `pending`. Does not touch the network.
    pub fn create(
        &self,
        endpoint_id: &str,
        remote_path: &str,
        request_id: Option<String>,
    ) -> TransferResult<String> {
        let id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.transfers.contains_key(&id) {
            return Err(TransferError::AlreadyExists(id));
        }

        let now = Utc::now();
        let transfer = Arc::new(Transfer {
            id: id.clone(),
            endpoint_id: endpoint_id.to_string(),
            remote_path: remote_path.to_string(),
            state: TransferStateMachine::new(),
            file_size: RwLock::new(None),
            total_chunks: RwLock::new(None),
            file_checksum: RwLock::new(None),
            scratch_path: self.scratch_dir.join(&id),
            output_path: RwLock::new(None),
            scratch_file: AsyncMutex::new(None),
            created_at: now,
            updated_at: RwLock::new(now),
            completed_at: RwLock::new(None),
            error: RwLock::new(None),
        });

        self.transfers.insert(id.clone(), transfer);
        Ok(id)
    }

    /// True iff `endpoint_id` already has a transfer in a non-terminal state.
    pub fn has_active_for_endpoint(&self, endpoint_id: &str) -> bool {
        self.transfers
            .iter()
            .any(|e| e.endpoint_id == endpoint_id && e.state.current_state().is_active())
    }

    pub async fn on_ack(
        &self,
        transfer_id: &str,
        success: bool,
        file_size: Option<u64>,
        total_chunks: Option<u32>,
        file_checksum: Option<String>,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> TransferResult<()> {
        let transfer = self.get_transfer(transfer_id)?;

        if success {
            let file_size = file_size.unwrap_or(0);
            let total_chunks = total_chunks.unwrap_or(0).max(1);
            let file_checksum = file_checksum.unwrap_or_default();

            transfer
                .state
                .transition(TransferEvent::AckSuccess {
                    file_size,
                    total_chunks,
                    file_checksum: file_checksum.clone(),
                })
                .map_err(|e| TransferError::InvalidStateTransition(e.to_string()))?;

            *transfer.file_size.write() = Some(file_size);
            *transfer.total_chunks.write() = Some(total_chunks);
            *transfer.file_checksum.write() = Some(file_checksum);
            self.tracker.init(transfer_id, total_chunks)?;
        } else {
            let reason = error_message.unwrap_or_else(|| "download ack reported failure".to_string());
            transfer
                .state
                .transition(TransferEvent::AckFailure {
                    reason: reason.clone(),
                })
                .map_err(|e| TransferError::InvalidStateTransition(e.to_string()))?;
            *transfer.error.write() = Some(TransferErrorInfo {
                code: error_code.unwrap_or_else(|| "INTERNAL_SERVER_ERROR".to_string()),
                message: reason,
                details: None,
            });
            *transfer.completed_at.write() = Some(Utc::now());
            self.close_scratch(&transfer).await;
        }

        transfer.touch();
        Ok(())
    }

    /// Writes, verifies, and tracks one inbound chunk.
    pub async fn on_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data_b64: &str,
        expected_checksum: &str,
    ) -> TransferResult<ChunkOutcome> {
        let transfer = self.get_transfer(transfer_id)?;
        if transfer.state.current_state().is_terminal() {
            return Err(TransferError::AlreadyTerminal(transfer_id.to_string()));
        }

        let bytes = match base64::engine::general_purpose::STANDARD.decode(data_b64) {
            Ok(b) => b,
            Err(_) => {
                return self
                    .fail_chunk(&transfer, chunk_index, FailureReason::ChecksumMismatch)
                    .await;
            }
        };

        if !checksum::verify(&bytes, expected_checksum) {
            return self
                .fail_chunk(&transfer, chunk_index, FailureReason::ChecksumMismatch)
                .await;
        }

        if let Err(e) = self.write_chunk(&transfer, chunk_index, &bytes).await {
            tracing::warn!(transfer_id, chunk_index, error = %e, "chunk write failed");
            return self
                .fail_chunk(&transfer, chunk_index, FailureReason::WriteError)
                .await;
        }

        let first_time = self.tracker.mark_received(transfer_id, chunk_index)?;

        let received = self
            .tracker
            .retry_info(transfer_id)
            .map(|i| i.received)
            .unwrap_or(0) as u32;
        let percent = ((received as u64 * 100) / total_chunks.max(1) as u64) as u8;
        let _ = transfer
            .state
            .transition(TransferEvent::ChunkProgress { percent });
        transfer.touch();

        Ok(ChunkOutcome::Ok { first_time })
    }

    async fn fail_chunk(
        &self,
        transfer: &Arc<Transfer>,
        chunk_index: u32,
        reason: FailureReason,
    ) -> TransferResult<ChunkOutcome> {
        let attempts = self.tracker.mark_failed(&transfer.id, chunk_index, reason)?;
        transfer.touch();
        if attempts > self.tracker.max_attempts() {
            return Ok(ChunkOutcome::MaxRetriesExceeded { attempts });
        }
        Ok(ChunkOutcome::Retry { reason, attempt: attempts })
    }

    async fn write_chunk(
        &self,
        transfer: &Arc<Transfer>,
        chunk_index: u32,
        bytes: &[u8],
    ) -> TransferResult<()> {
        let mut guard = transfer.scratch_file.lock().await;
        if guard.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&transfer.scratch_path)
                .await?;
            *guard = Some(file);
        }
        let file = guard.as_mut().expect("scratch file just opened");
        let offset = chunk_index as u64 * CHUNK_SIZE;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    /// Call when all chunks were reported and the endpoint sends
    /// DOWNLOAD_COMPLETE. Returns the list of still-missing chunk indices to
    /// retry (empty iff the transfer actually completed).
    pub async fn on_complete(
        &self,
        transfer_id: &str,
        declared_checksum: &str,
    ) -> TransferResult<Vec<u32>> {
        let transfer = self.get_transfer(transfer_id)?;
        if transfer.state.current_state().is_terminal() {
            return Err(TransferError::AlreadyTerminal(transfer_id.to_string()));
        }
        let missing = self.tracker.missing(transfer_id);
        if !missing.is_empty() {
            for chunk_index in &missing {
                let _ = self
                    .tracker
                    .mark_failed(transfer_id, *chunk_index, FailureReason::MissingAtComplete);
            }
            return Ok(missing);
        }

        let mut guard = transfer.scratch_file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await?;
        }
        drop(guard);

        let computed = checksum::hash_file(&transfer.scratch_path).await?;
        if !computed.eq_ignore_ascii_case(declared_checksum) {
            let reason = "whole-file checksum mismatch".to_string();
            transfer
                .state
                .transition(TransferEvent::Fail {
                    reason: reason.clone(),
                })
                .map_err(|e| TransferError::InvalidStateTransition(e.to_string()))?;
            *transfer.error.write() = Some(TransferErrorInfo {
                code: "CHUNK_TRANSFER_FAILED".to_string(),
                message: reason,
                details: Some(serde_json::json!({
                    "expectedChecksum": declared_checksum,
                    "computedChecksum": computed,
                })),
            });
            *transfer.completed_at.write() = Some(Utc::now());
            transfer.touch();
            self.tracker.cleanup(transfer_id);
            if !self.keep_failed_scratch {
                let _ = tokio::fs::remove_file(&transfer.scratch_path).await;
            }
            return Ok(Vec::new());
        }

        let ext = std::path::Path::new(&transfer.remote_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let output_path = self.download_dir.join(format!(
            "{}-{}.{}",
            transfer.endpoint_id,
            Utc::now().timestamp_millis(),
            ext
        ));
        tokio::fs::rename(&transfer.scratch_path, &output_path).await?;
        *transfer.output_path.write() = Some(output_path);

        transfer
            .state
            .transition(TransferEvent::Complete)
            .map_err(|e| TransferError::InvalidStateTransition(e.to_string()))?;
        *transfer.completed_at.write() = Some(Utc::now());
        transfer.touch();
        self.tracker.cleanup(transfer_id);

        Ok(Vec::new())
    }

    /// Marks a transfer as failed for a reason originating outside the
    /// chunk/ack/complete flow (e.g. endpoint disconnect past timeout).
    /// Uses `INTERNAL_SERVER_ERROR` as the error code; callers with a more
    /// specific code (e.g. a chunk exhausting its retries) should use
    /// [`Self::fail_with`] instead.
    pub async fn fail(&self, transfer_id: &str, reason: &str) -> TransferResult<()> {
        self.fail_with(transfer_id, reason, "INTERNAL_SERVER_ERROR", None).await
    }

    /// Like [`Self::fail`] but stamps the transfer's exposed error with a
    /// specific `code` and optional `details`, matching the control plane's
    /// fixed error-code vocabulary (e.g. `CHUNK_TRANSFER_FAILED` with
    /// `{chunkIndex}` once a chunk exhausts its retry attempts).
    pub async fn fail_with(
        &self,
        transfer_id: &str,
        reason: &str,
        code: &str,
        details: Option<serde_json::Value>,
    ) -> TransferResult<()> {
        let transfer = self.get_transfer(transfer_id)?;
        if transfer.state.current_state().is_terminal() {
            return Ok(());
        }
        transfer
            .state
            .transition(TransferEvent::Fail {
                reason: reason.to_string(),
            })
            .map_err(|e| TransferError::InvalidStateTransition(e.to_string()))?;
        *transfer.error.write() = Some(TransferErrorInfo {
            code: code.to_string(),
            message: reason.to_string(),
            details,
        });
        *transfer.completed_at.write() = Some(Utc::now());
        transfer.touch();
        self.tracker.cleanup(transfer_id);
        self.close_scratch(&transfer).await;
        Ok(())
    }

    pub async fn cancel(&self, transfer_id: &str, reason: &str) -> TransferResult<()> {
        let transfer = self.get_transfer(transfer_id)?;
        if transfer.state.current_state().is_terminal() {
            return Err(TransferError::AlreadyTerminal(transfer_id.to_string()));
        }
        transfer
            .state
            .transition(TransferEvent::Cancel {
                reason: reason.to_string(),
            })
            .map_err(|e| TransferError::InvalidStateTransition(e.to_string()))?;
        transfer.touch();
        self.tracker.cleanup(transfer_id);
        self.close_scratch(&transfer).await;
        let _ = tokio::fs::remove_file(&transfer.scratch_path).await;
        Ok(())
    }

    async fn close_scratch(&self, transfer: &Arc<Transfer>) {
        let mut guard = transfer.scratch_file.lock().await;
        if let Some(mut file) = guard.take() {
            let _ = file.flush().await;
        }
    }

    pub fn endpoint_of(&self, transfer_id: &str) -> Option<String> {
        self.transfers.get(transfer_id).map(|t| t.endpoint_id.clone())
    }

    pub fn get(&self, transfer_id: &str) -> TransferResult<TransferSnapshot> {
        let transfer = self.get_transfer(transfer_id)?;
        Ok(self.snapshot(&transfer))
    }

    pub fn list(&self, filter: TransferFilter) -> Vec<TransferSnapshot> {
        let mut snapshots: Vec<TransferSnapshot> = self
            .transfers
            .iter()
            .map(|e| self.snapshot(e.value()))
            .filter(|s| filter.status.as_deref().map_or(true, |st| st == s.status))
            .filter(|s| filter.client_id.as_deref().map_or(true, |c| c == s.client_id))
            .collect();

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(snapshots.len());
        snapshots.into_iter().skip(offset).take(limit).collect()
    }

    /// Evicts terminal transfers whose completion is older than `retention`.
    pub fn sweep(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let stale: Vec<String> = self
            .transfers
            .iter()
            .filter(|e| {
                let state = e.state.current_state();
                state.is_terminal()
                    && e.completed_at
                        .read()
                        .map(|t| t < cutoff)
                        .unwrap_or_else(|| *e.updated_at.read() < cutoff)
            })
            .map(|e| e.id.clone())
            .collect();

        for id in &stale {
            self.transfers.remove(id);
        }
        stale.len()
    }

    fn get_transfer(&self, transfer_id: &str) -> TransferResult<Arc<Transfer>> {
        self.transfers
            .get(transfer_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))
    }

    fn snapshot(&self, transfer: &Arc<Transfer>) -> TransferSnapshot {
        let state = transfer.state.current_state();
        let total_chunks = *transfer.total_chunks.read();
        let progress = total_chunks.map(|total| {
            let info = self.tracker.retry_info(&transfer.id);
            let received = info.as_ref().map(|i| i.received as u32).unwrap_or(0);
            let percentage = match &state {
                crate::transfer::types::TransferState::InProgress { progress } => *progress,
                crate::transfer::types::TransferState::Completed => 100,
                _ => 0,
            };
            TransferProgress {
                chunks_received: received,
                total_chunks: total,
                percentage,
                bytes_received: received as u64 * CHUNK_SIZE,
                retried_chunks: info
                    .map(|i| {
                        i.retried_chunks
                            .into_iter()
                            .map(|l| RetriedChunk {
                                chunk_index: l.chunk_index,
                                attempts: l.attempts,
                                status: format!("{:?}", l.status).to_lowercase(),
                                reason: l.reason.map(|r| r.to_string()),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            }
        });

        let created_at = transfer.created_at;
        let completed_at = *transfer.completed_at.read();
        let duration_ms = completed_at.map(|c| (c - created_at).num_milliseconds());

        TransferSnapshot {
            request_id: transfer.id.clone(),
            client_id: transfer.endpoint_id.clone(),
            file_path: transfer.remote_path.clone(),
            status: state.label().to_string(),
            progress,
            created_at,
            updated_at: *transfer.updated_at.read(),
            completed_at,
            duration_ms,
            error: transfer.error.read().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_manager(dir: &TempDir) -> (TransferManager, tokio::sync::mpsc::UnboundedReceiver<crate::tracker::TrackerEvent>) {
        let (tracker, rx) = ChunkTracker::new(TrackerConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            arrival_timeout: Duration::from_secs(5),
        });
        (
            TransferManager::new(dir.path().to_path_buf(), tracker),
            rx,
        )
    }

    #[tokio::test]
    async fn test_small_happy_path() {
        let dir = TempDir::new().unwrap();
        let (manager, _rx) = test_manager(&dir);
        manager.ensure_directories().await.unwrap();

        let id = manager.create("edge-001", "/data/x.txt", None).unwrap();
        let data = b"Hello, World!";
        let digest = checksum::hash(data);

        manager
            .on_ack(&id, true, Some(data.len() as u64), Some(1), Some(digest.clone()), None, None)
            .await
            .unwrap();

        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let outcome = manager
            .on_chunk(&id, 0, 1, &encoded, &checksum::hash(data))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Ok { first_time: true }));

        let missing = manager.on_complete(&id, &digest).await.unwrap();
        assert!(missing.is_empty());

        let snapshot = manager.get(&id).unwrap();
        assert_eq!(snapshot.status, "completed");
        assert_eq!(snapshot.progress.unwrap().percentage, 100);
    }

    #[tokio::test]
    async fn test_ack_failure_is_terminal() {
        let dir = TempDir::new().unwrap();
        let (manager, _rx) = test_manager(&dir);
        manager.ensure_directories().await.unwrap();

        let id = manager.create("edge-001", "/missing.txt", None).unwrap();
        manager
            .on_ack(
                &id,
                false,
                None,
                None,
                None,
                Some("FILE_NOT_FOUND".into()),
                Some("file not found on endpoint".into()),
            )
            .await
            .unwrap();

        let snapshot = manager.get(&id).unwrap();
        assert_eq!(snapshot.status, "failed");
        let error = snapshot.error.unwrap();
        assert_eq!(error.code, "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_corrupted_chunk_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let (manager, _rx) = test_manager(&dir);
        manager.ensure_directories().await.unwrap();

        let id = manager.create("edge-001", "/data/x.txt", None).unwrap();
        let data = b"a".repeat(10);
        manager
            .on_ack(&id, true, Some(10), Some(1), Some(checksum::hash(&data)), None, None)
            .await
            .unwrap();

        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let bad_outcome = manager.on_chunk(&id, 0, 1, &encoded, "0".repeat(64).as_str()).await.unwrap();
        assert!(matches!(bad_outcome, ChunkOutcome::Retry { attempt: 1, .. }));

        let good_outcome = manager
            .on_chunk(&id, 0, 1, &encoded, &checksum::hash(&data))
            .await
            .unwrap();
        assert!(matches!(good_outcome, ChunkOutcome::Ok { first_time: true }));
    }

    #[tokio::test]
    async fn test_cancel_removes_scratch_file() {
        let dir = TempDir::new().unwrap();
        let (manager, _rx) = test_manager(&dir);
        manager.ensure_directories().await.unwrap();

        let id = manager.create("edge-001", "/data/x.txt", None).unwrap();
        manager
            .on_ack(&id, true, Some(10), Some(1), Some("0".repeat(64)), None, None)
            .await
            .unwrap();
        manager.cancel(&id, "operator requested").await.unwrap();

        let snapshot = manager.get(&id).unwrap();
        assert_eq!(snapshot.status, "cancelled");
        assert!(manager.cancel(&id, "again").await.is_err());

        let chunk = base64::engine::general_purpose::STANDARD.encode(b"x");
        assert!(manager.on_chunk(&id, 0, 1, &chunk, &checksum::hash(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_active_transfer_detected() {
        let dir = TempDir::new().unwrap();
        let (manager, _rx) = test_manager(&dir);
        manager.ensure_directories().await.unwrap();

        manager.create("edge-001", "/a.txt", None).unwrap();
        assert!(manager.has_active_for_endpoint("edge-001"));
    }

    #[tokio::test]
    async fn test_sweeper_evicts_old_terminal_transfers() {
        let dir = TempDir::new().unwrap();
        let (manager, _rx) = test_manager(&dir);
        manager.ensure_directories().await.unwrap();

        let id = manager.create("edge-001", "/a.txt", None).unwrap();
        manager
            .on_ack(&id, false, None, None, None, None, Some("nope".into()))
            .await
            .unwrap();

        let evicted = manager.sweep(chrono::Duration::seconds(-1));
        assert_eq!(evicted, 1);
        assert!(manager.get(&id).is_err());
    }
}
