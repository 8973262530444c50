use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("transfer not found: {0}")]
    NotFound(String),

    #[error("transfer already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("endpoint already has an active transfer: {0}")]
    AlreadyInProgress(String),

    #[error("transfer is already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("checksum error: {0}")]
    Checksum(#[from] crate::checksum::ChecksumError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk data: {0}")]
    InvalidChunkData(String),
}

pub type TransferResult<T> = Result<T, TransferError>;
