mod error;
mod types;

pub use error::{TrackerError, TrackerResult};
pub use types::{ChunkStatus, FailureReason, LedgerEntry, RetryInfo, TrackerConfig, TrackerEvent};

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Per-chunk timer pair. At most one arrival timer and one retry timer are
/// ever alive for a given (transfer, chunk) — every transition that touches
/// a chunk's status cancels both before possibly scheduling a new one.
#[derive(Default)]
struct TimerSet {
    arrival: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSet {
    fn cancel(&mut self) {
        if let Some(h) = self.arrival.take() {
            h.abort();
        }
        if let Some(h) = self.retry.take() {
            h.abort();
        }
        self.generation += 1;
    }

    fn cancel_arrival(&mut self) {
        if let Some(h) = self.arrival.take() {
            h.abort();
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(h) = self.retry.take() {
            h.abort();
        }
    }
}

struct TransferRecord {
    total_chunks: u32,
    received: HashSet<u32>,
    ledger: HashMap<u32, LedgerEntry>,
    expected_next: u32,
    timers: HashMap<u32, TimerSet>,
}

impl TransferRecord {
    fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            received: HashSet::new(),
            ledger: HashMap::new(),
            expected_next: 0,
            timers: HashMap::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
    }

    fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}

struct Shared {
    transfers: DashMap<String, RwLock<TransferRecord>>,
    event_tx: mpsc::UnboundedSender<TrackerEvent>,
    config: TrackerConfig,
}

/// Per-transfer chunk bookkeeping: received set, retry ledger, and the
/// arrival/retry timers that drive the backoff protocol. Cloning shares the
/// same underlying maps and event channel (cheap `Arc` clone).
#[derive(Clone)]
pub struct ChunkTracker {
    shared: Arc<Shared>,
}

impl ChunkTracker {
    pub fn new(config: TrackerConfig) -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let tracker = Self {
            shared: Arc::new(Shared {
                transfers: DashMap::new(),
                event_tx,
                config,
            }),
        };
        (tracker, event_rx)
    }

    /// Registers a transfer with its declared chunk count. Idempotent for a
    /// repeated call with the same count; an error if the count disagrees.
    pub fn init(&self, transfer_id: &str, total_chunks: u32) -> TrackerResult<()> {
        if let Some(existing) = self.shared.transfers.get(transfer_id) {
            if existing.read().total_chunks != total_chunks {
                return Err(TrackerError::AlreadyInitialized(transfer_id.to_string()));
            }
            return Ok(());
        }
        self.shared
            .transfers
            .insert(transfer_id.to_string(), RwLock::new(TransferRecord::new(total_chunks)));
        self.start_arrival_timer(transfer_id, 0);
        Ok(())
    }

    /// Marks a chunk received. Returns `true` the first time this index is
    /// seen, `false` on a duplicate delivery (a no-op on the ledger).
    pub fn mark_received(&self, transfer_id: &str, chunk_index: u32) -> TrackerResult<bool> {
        let entry = self
            .shared
            .transfers
            .get(transfer_id)
            .ok_or_else(|| TrackerError::UnknownTransfer(transfer_id.to_string()))?;
        let mut rec = entry.write();
        if chunk_index >= rec.total_chunks {
            return Err(TrackerError::InvalidChunkIndex {
                index: chunk_index,
                total: rec.total_chunks,
            });
        }

        if !rec.received.insert(chunk_index) {
            return Ok(false);
        }

        if let Some(timer) = rec.timers.get_mut(&chunk_index) {
            timer.cancel();
        }
        if let Some(ledger) = rec.ledger.get_mut(&chunk_index) {
            ledger.status = ChunkStatus::Succeeded;
            ledger.last_attempt_at = chrono::Utc::now();
        }

        if chunk_index == rec.expected_next {
            while rec.received.contains(&rec.expected_next) && rec.expected_next < rec.total_chunks {
                rec.expected_next += 1;
            }
        }

        let next = rec.expected_next;
        let complete = rec.is_complete();
        drop(rec);

        if !complete {
            self.start_arrival_timer(transfer_id, next);
        }

        Ok(true)
    }

    /// Records a chunk failure and schedules a retry unless attempts are
    /// exhausted, in which case `MaxRetriesExceeded` is emitted instead.
    pub fn mark_failed(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        reason: FailureReason,
    ) -> TrackerResult<u32> {
        let entry = self
            .shared
            .transfers
            .get(transfer_id)
            .ok_or_else(|| TrackerError::UnknownTransfer(transfer_id.to_string()))?;
        let mut rec = entry.write();
        if chunk_index >= rec.total_chunks {
            return Err(TrackerError::InvalidChunkIndex {
                index: chunk_index,
                total: rec.total_chunks,
            });
        }

        let ledger = rec
            .ledger
            .entry(chunk_index)
            .or_insert_with(|| LedgerEntry {
                chunk_index,
                attempts: 0,
                last_attempt_at: chrono::Utc::now(),
                status: ChunkStatus::Pending,
                reason: None,
            });
        ledger.attempts += 1;
        ledger.last_attempt_at = chrono::Utc::now();
        ledger.status = ChunkStatus::Failed;
        ledger.reason = Some(reason);
        let attempts = ledger.attempts;

        let timer = rec.timers.entry(chunk_index).or_default();
        timer.cancel_arrival();
        timer.cancel_retry();

        if attempts > self.shared.config.max_attempts {
            drop(rec);
            let _ = self.shared.event_tx.send(TrackerEvent::MaxRetriesExceeded {
                transfer_id: transfer_id.to_string(),
                chunk_index,
                attempts,
                reason,
            });
            return Ok(attempts);
        }

        let delay = backoff_delay(&self.shared.config, attempts);
        let generation = timer.generation;
        drop(rec);

        self.schedule_retry_timer(transfer_id, chunk_index, attempts, reason, generation, delay);
        Ok(attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.shared.config.max_attempts
    }

    pub fn is_complete(&self, transfer_id: &str) -> bool {
        self.shared
            .transfers
            .get(transfer_id)
            .map(|e| e.read().is_complete())
            .unwrap_or(false)
    }

    pub fn missing(&self, transfer_id: &str) -> Vec<u32> {
        self.shared
            .transfers
            .get(transfer_id)
            .map(|e| e.read().missing())
            .unwrap_or_default()
    }

    pub fn retry_info(&self, transfer_id: &str) -> Option<RetryInfo> {
        self.shared.transfers.get(transfer_id).map(|e| {
            let rec = e.read();
            RetryInfo {
                total_chunks: rec.total_chunks,
                received: rec.received.len(),
                retried_chunks: rec
                    .ledger
                    .values()
                    .filter(|l| l.attempts > 0)
                    .cloned()
                    .collect(),
            }
        })
    }

    /// Cancels every live timer for the transfer and drops its record.
    /// Safe to call on an unknown transfer id (a no-op).
    pub fn cleanup(&self, transfer_id: &str) {
        if let Some((_, entry)) = self.shared.transfers.remove(transfer_id) {
            let mut rec = entry.into_inner();
            for timer in rec.timers.values_mut() {
                timer.cancel();
            }
        }
    }

    fn start_arrival_timer(&self, transfer_id: &str, chunk_index: u32) {
        let entry = match self.shared.transfers.get(transfer_id) {
            Some(e) => e,
            None => return,
        };
        let mut rec = entry.write();
        let timer = rec.timers.entry(chunk_index).or_default();
        timer.cancel_arrival();
        let generation = timer.generation;
        let timeout = self.shared.config.arrival_timeout;
        drop(rec);

        let shared = self.shared.clone();
        let tid = transfer_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(entry) = shared.transfers.get(&tid) else {
                return;
            };
            let fire = {
                let rec = entry.read();
                rec.timers
                    .get(&chunk_index)
                    .map(|t| t.generation == generation)
                    .unwrap_or(false)
                    && !rec.received.contains(&chunk_index)
            };
            if fire {
                let _ = shared.event_tx.send(TrackerEvent::ArrivalTimeout {
                    transfer_id: tid,
                    chunk_index,
                });
            }
        });

        if let Some(entry) = self.shared.transfers.get(transfer_id) {
            let mut rec = entry.write();
            if let Some(timer) = rec.timers.get_mut(&chunk_index) {
                if timer.generation == generation {
                    timer.arrival = Some(handle);
                } else {
                    handle.abort();
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_retry_timer(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        attempt: u32,
        reason: FailureReason,
        generation: u64,
        delay: Duration,
    ) {
        let shared = self.shared.clone();
        let tid = transfer_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(entry) = shared.transfers.get(&tid) else {
                return;
            };
            let fire = {
                let rec = entry.read();
                rec.timers
                    .get(&chunk_index)
                    .map(|t| t.generation == generation)
                    .unwrap_or(false)
                    && !rec.received.contains(&chunk_index)
            };
            if !fire {
                return;
            }
            let _ = shared.event_tx.send(TrackerEvent::RetryDue {
                transfer_id: tid.clone(),
                chunk_index,
                attempt,
                reason,
            });
            drop(entry);
            // restart the arrival timer for the resend, per §4.2/§9.
            let tracker = ChunkTracker {
                shared: shared.clone(),
            };
            tracker.start_arrival_timer(&tid, chunk_index);
        });

        if let Some(entry) = self.shared.transfers.get(transfer_id) {
            let mut rec = entry.write();
            if let Some(timer) = rec.timers.get_mut(&chunk_index) {
                if timer.generation == generation {
                    timer.retry = Some(handle);
                } else {
                    handle.abort();
                }
            }
        }
    }
}

/// `BASE_DELAY * 2^(attempts-1)`, capped, plus up to 10% jitter.
fn backoff_delay(config: &TrackerConfig, attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(20);
    let raw = config.base_delay.as_millis().saturating_mul(1u128 << exp);
    let capped = raw.min(config.max_delay.as_millis());
    let jitter_span = capped / 10;
    let jitter = if jitter_span == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_span)
    };
    Duration::from_millis((capped + jitter) as u64)
}
