use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Declared frame length {declared} outside accepted range (max {max})")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame source error: {0}")]
    Source(String),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl AppError {
    /// Whether this error came from the peer violating the wire format
    /// (as opposed to the transport failing underneath it).
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            AppError::Protocol(_) | AppError::FrameTooLarge { .. } | AppError::HttpStatus(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
