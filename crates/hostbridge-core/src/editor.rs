//! Editor operations forwarded to the client
//!
//! Positions inside the host are one-based (line, column), as the command
//! engine reports them. The client speaks zero-based (line, character). Every
//! position and range is translated when it crosses the boundary, in both
//! directions.
//!
//! All remote operations wait for the client's acknowledgement, text insertion
//! included, so consecutive edits are applied in the order they were issued.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Span};

use hostbridge_protocol::messages::{
    methods, ClientEditorContext, CloseFileDetails, InsertTextRequest, MessageDetails,
    OpenFileDetails, Position, Range, SaveFileDetails, SetSelectionRequest,
    StatusBarMessageDetails,
};
use hostbridge_protocol::MessageSender;

use crate::config::EditorConfig;
use crate::error::{Error, Result};

/// One-based position inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferPosition {
    pub line: u32,
    pub column: u32,
}

impl BufferPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl From<Position> for BufferPosition {
    fn from(position: Position) -> Self {
        Self {
            line: position.line + 1,
            column: position.character + 1,
        }
    }
}

impl From<BufferPosition> for Position {
    // One-based positions start at 1; a 0 component clamps to the first line/character
    fn from(position: BufferPosition) -> Self {
        Self {
            line: position.line.saturating_sub(1),
            character: position.column.saturating_sub(1),
        }
    }
}

/// One-based range inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub start: BufferPosition,
    pub end: BufferPosition,
}

impl BufferRange {
    pub fn new(start: BufferPosition, end: BufferPosition) -> Self {
        Self { start, end }
    }

    /// Empty range at a single position
    pub fn at(position: BufferPosition) -> Self {
        Self::new(position, position)
    }
}

impl From<Range> for BufferRange {
    fn from(range: Range) -> Self {
        Self {
            start: range.start.into(),
            end: range.end.into(),
        }
    }
}

impl From<BufferRange> for Range {
    fn from(range: BufferRange) -> Self {
        Self {
            start: range.start.into(),
            end: range.end.into(),
        }
    }
}

/// State of the client's active editor, in host coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorContext {
    pub file_path: PathBuf,
    pub file_content: String,
    pub language: String,
    pub cursor_position: BufferPosition,
    pub selection_range: BufferRange,
}

impl From<ClientEditorContext> for EditorContext {
    fn from(context: ClientEditorContext) -> Self {
        Self {
            file_path: PathBuf::from(context.current_file_path),
            file_content: context.current_file_content,
            language: context.current_file_language,
            cursor_position: context.cursor_position.into(),
            selection_range: context.selection_range.into(),
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Request/response facade over the client's editor API
pub struct EditorOperations {
    sender: Arc<dyn MessageSender>,
    workspace_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    span: Span,
}

impl EditorOperations {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        workspace_path: Option<PathBuf>,
        config: &EditorConfig,
        span: Span,
    ) -> Self {
        Self {
            sender,
            workspace_path,
            request_timeout: config.request_timeout_ms.map(Duration::from_millis),
            span,
        }
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(parent: &self.span, method, "Editor request");
        let call = self.sender.request(method, params);
        let result = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        };
        Ok(result?)
    }

    async fn acknowledged<P>(&self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + Sync,
    {
        let _: Value = self.request(method, params).await?;
        Ok(())
    }

    pub async fn get_editor_context(&self) -> Result<EditorContext> {
        let context: ClientEditorContext =
            self.request(methods::GET_EDITOR_CONTEXT, &json!({})).await?;
        Ok(context.into())
    }

    pub async fn insert_text(&self, file_path: &Path, text: &str, range: BufferRange) -> Result<()> {
        let request = InsertTextRequest {
            file_path: path_string(file_path),
            insert_text: text.to_string(),
            insert_range: range.into(),
        };
        self.acknowledged(methods::INSERT_TEXT, &request).await
    }

    pub async fn set_selection(&self, range: BufferRange) -> Result<()> {
        let request = SetSelectionRequest {
            selection_range: range.into(),
        };
        self.acknowledged(methods::SET_SELECTION, &request).await
    }

    pub async fn new_file(&self) -> Result<()> {
        self.acknowledged(methods::NEW_FILE, &json!({})).await
    }

    pub async fn open_file(&self, path: &Path, preview: bool) -> Result<()> {
        let details = OpenFileDetails {
            file_path: path_string(path),
            preview,
        };
        self.acknowledged(methods::OPEN_FILE, &details).await
    }

    /// Save a file, optionally under a new path
    pub async fn save_file(&self, path: &Path, new_path: Option<&Path>) -> Result<()> {
        let details = SaveFileDetails {
            file_path: path_string(path),
            new_path: new_path.map(path_string),
        };
        self.acknowledged(methods::SAVE_FILE, &details).await
    }

    pub async fn close_file(&self, path: &Path) -> Result<()> {
        let details = CloseFileDetails {
            file_path: path_string(path),
        };
        self.acknowledged(methods::CLOSE_FILE, &details).await
    }

    pub async fn show_information_message(&self, message: &str) -> Result<()> {
        self.show_message(methods::SHOW_INFORMATION_MESSAGE, message)
            .await
    }

    pub async fn show_warning_message(&self, message: &str) -> Result<()> {
        self.show_message(methods::SHOW_WARNING_MESSAGE, message)
            .await
    }

    pub async fn show_error_message(&self, message: &str) -> Result<()> {
        self.show_message(methods::SHOW_ERROR_MESSAGE, message).await
    }

    async fn show_message(&self, method: &str, message: &str) -> Result<()> {
        let details = MessageDetails {
            message: message.to_string(),
        };
        self.acknowledged(method, &details).await
    }

    pub async fn set_status_bar_message(
        &self,
        message: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let details = StatusBarMessageDetails {
            message: message.to_string(),
            timeout: timeout.map(|t| t.as_millis() as u64),
        };
        self.acknowledged(methods::SET_STATUS_BAR_MESSAGE, &details)
            .await
    }

    /// Workspace root, if the session has one
    pub fn get_workspace_path(&self) -> Option<&Path> {
        self.workspace_path.as_deref()
    }

    /// Path relative to the workspace root, or unchanged when outside it
    pub fn get_workspace_relative_path(&self, path: &Path) -> PathBuf {
        self.workspace_path
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf())
    }
}
