use crate::session::SessionState;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, TranscriberError>;

#[derive(Error, Debug)]
pub enum TranscriberError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Handshake rejected by server: {0}")]
    Handshake(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Message decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transcript conduit is full (capacity {0})")]
    ConduitOverflow(usize),

    #[error("Session faulted: {0}")]
    Faulted(String),
}

impl TranscriberError {
    /// True for errors that leave the session unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TranscriberError::InvalidState { .. } | TranscriberError::Cancelled
        )
    }
}

impl From<crate::config::ConfigError> for TranscriberError {
    fn from(err: crate::config::ConfigError) -> Self {
        TranscriberError::Configuration(err.to_string())
    }
}
