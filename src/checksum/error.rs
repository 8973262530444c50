use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid checksum length: expected 64 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("invalid checksum encoding: {0}")]
    InvalidEncoding(#[from] hex::FromHexError),
}

pub type ChecksumResult<T> = Result<T, ChecksumError>;
