use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("client id already in use: {0}")]
    AlreadyRegistered(String),

    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("client not connected: {0}")]
    ClientNotConnected(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] crate::transfer::TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HubResult<T> = Result<T, HubError>;
