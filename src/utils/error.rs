use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dial failed: {0}")]
    Dial(String),

    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Dial cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MuxError>;
