//! Error types for Hostbridge Core

use thiserror::Error;

use hostbridge_protocol::ChannelError;

use crate::prompt::PromptKind;
use crate::session::SessionState;

/// Result type alias using Hostbridge Error
pub type Result<T> = std::result::Result<T, Error>;

/// Hostbridge error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid session state: cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Session hook failed: {0}")]
    Handler(String),

    #[error("A {0} prompt is already awaiting a response")]
    PromptPending(PromptKind),

    #[error("No {0} prompt is awaiting a response")]
    NoPendingPrompt(PromptKind),

    #[error("Prompt cancelled")]
    PromptCancelled,

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),
}
