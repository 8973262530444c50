use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("transfer already initialized with a different chunk count: {0}")]
    AlreadyInitialized(String),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("chunk index {index} out of range for {total} total chunks")]
    InvalidChunkIndex { index: u32, total: u32 },
}

pub type TrackerResult<T> = Result<T, TrackerError>;
