//! Hostbridge Core - session host for editor-integrated command engines
//!
//! This crate provides the pieces a command engine needs to run inside an
//! editor over a message channel:
//! - Session lifecycle (start, shutdown request, exit) with implementor hooks
//! - Output coalescing into throttled, category-grouped events
//! - Prompt bridging between the local console and the editor's dialogs
//! - Editor operations with coordinate translation
//! - Configuration loading

pub mod config;
pub mod editor;
pub mod error;
pub mod host;
pub mod output;
pub mod prompt;
pub mod session;

pub use config::{Config, ConfigManager, EditorConfig, LoggingConfig, OutputConfig, SessionSettings};
pub use editor::{BufferPosition, BufferRange, EditorContext, EditorOperations};
pub use error::{Error, Result};
pub use host::HostConsole;
pub use output::{OutputChunk, OutputCoalescer};
pub use prompt::{PromptBridge, PromptKind, PromptOutcome, PromptRequest, Prompts};
pub use session::{ExitSignal, ExitStatus, Session, SessionHooks, SessionState};
