use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{TransferEvent, TransferState};
use parking_lot::RwLock;
use std::sync::Arc;

/// Drives a single transfer's status through the 5-state diagram of
/// pending -> in_progress -> {completed, failed, cancelled}.
pub struct TransferStateMachine {
    state: Arc<RwLock<TransferState>>,
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TransferState::Pending)),
        }
    }

    pub fn current_state(&self) -> TransferState {
        self.state.read().clone()
    }

    pub fn transition(&self, event: TransferEvent) -> TransferResult<TransferState> {
        let mut state = self.state.write();

        let new_state = match (&*state, &event) {
            (TransferState::Pending, TransferEvent::AckSuccess { .. }) => {
                TransferState::InProgress { progress: 0 }
            }

            (TransferState::Pending, TransferEvent::AckFailure { reason }) => {
                TransferState::Failed {
                    reason: reason.clone(),
                }
            }

            (TransferState::InProgress { .. }, TransferEvent::ChunkProgress { percent }) => {
                TransferState::InProgress { progress: *percent }
            }

            (TransferState::InProgress { .. }, TransferEvent::Complete) => TransferState::Completed,

            (TransferState::InProgress { .. }, TransferEvent::Fail { reason }) => {
                TransferState::Failed {
                    reason: reason.clone(),
                }
            }

            (TransferState::Pending, TransferEvent::Cancel { reason })
            | (TransferState::InProgress { .. }, TransferEvent::Cancel { reason }) => {
                TransferState::Cancelled {
                    reason: reason.clone(),
                }
            }

            _ => {
                return Err(TransferError::InvalidStateTransition(format!(
                    "cannot handle {:?} in state {:?}",
                    event, *state
                )));
            }
        };

        *state = new_state.clone();
        Ok(new_state)
    }
}

impl Clone for TransferStateMachine {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}
