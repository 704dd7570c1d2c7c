use thiserror::Error;

/// Errors produced by the wmux communication layer.
#[derive(Debug, Error)]
pub enum CommsError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("not connected to {0}")]
    NotConnected(crate::server_id::ServerId),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ciborium::de::Error<std::io::Error>> for CommsError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        CommsError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for CommsError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        CommsError::Codec(e.to_string())
    }
}

pub type CommsResult<T> = Result<T, CommsError>;
