//! Error types for the message channel

use thiserror::Error;

use crate::protocol::ResponseError;

/// Result type alias using ChannelError
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Channel error types
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Channel closed")]
    Closed,

    #[error("Channel already started")]
    AlreadyStarted,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ResponseError> for ChannelError {
    fn from(error: ResponseError) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
        }
    }
}
