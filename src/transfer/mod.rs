mod error;
mod manager;
mod state_machine;
mod sweeper;
mod types;

pub use error::{TransferError, TransferResult};
pub use manager::{ChunkOutcome, TransferManager, CHUNK_SIZE};
pub use state_machine::TransferStateMachine;
pub use sweeper::spawn as spawn_sweeper;
pub use types::{
    RetriedChunk, TransferEvent, TransferFilter, TransferProgress, TransferSnapshot, TransferState,
};
