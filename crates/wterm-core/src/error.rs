use std::io::ErrorKind;
use thiserror::Error;

/// Errors produced by the wterm protocol layer and its backends.
#[derive(Debug, Error)]
pub enum WtermError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("session not found: {0}")]
    SessionNotFound(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("volume error: {0}")]
    Volume(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl WtermError {
    /// Whether this error means the peer went away (closed or reset the socket)
    /// rather than something going wrong mid-conversation.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            WtermError::ConnectionClosed => true,
            WtermError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WtermError {
    fn from(e: serde_json::Error) -> Self {
        WtermError::Codec(e.to_string())
    }
}

pub type WtermResult<T> = Result<T, WtermError>;
