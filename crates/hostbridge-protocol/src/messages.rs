//! Wire payloads exchanged with the editor client
//!
//! Field names follow the client's PascalCase convention. Positions on the
//! wire are zero-based.

use serde::{Deserialize, Serialize};

/// Method names understood by the host and the client
pub mod methods {
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const OUTPUT: &str = "output";

    pub const SHOW_CHOICE_PROMPT: &str = "powerShell/showChoicePrompt";
    pub const SHOW_INPUT_PROMPT: &str = "powerShell/showInputPrompt";

    pub const GET_EDITOR_CONTEXT: &str = "editor/getEditorContext";
    pub const INSERT_TEXT: &str = "editor/insertText";
    pub const SET_SELECTION: &str = "editor/setSelection";
    pub const NEW_FILE: &str = "editor/newFile";
    pub const OPEN_FILE: &str = "editor/openFile";
    pub const SAVE_FILE: &str = "editor/saveFile";
    pub const CLOSE_FILE: &str = "editor/closeFile";
    pub const SHOW_INFORMATION_MESSAGE: &str = "editor/showInformationMessage";
    pub const SHOW_WARNING_MESSAGE: &str = "editor/showWarningMessage";
    pub const SHOW_ERROR_MESSAGE: &str = "editor/showErrorMessage";
    pub const SET_STATUS_BAR_MESSAGE: &str = "editor/setStatusBarMessage";
}

/// Stream an output batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    Stdout,
    Stderr,
}

impl OutputCategory {
    pub fn from_is_error(is_error: bool) -> Self {
        if is_error {
            OutputCategory::Stderr
        } else {
            OutputCategory::Stdout
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputEvent {
    pub output: String,
    pub category: OutputCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceDetails {
    pub label: String,
    #[serde(default)]
    pub help_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShowChoicePromptRequest {
    pub is_multi_choice: bool,
    pub caption: String,
    pub message: String,
    pub choices: Vec<ChoiceDetails>,
    pub default_choices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShowInputPromptRequest {
    pub name: String,
    pub label: String,
}

/// Reply to either prompt request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShowPromptResponse {
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub prompt_cancelled: bool,
}

/// Zero-based position in a text document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientEditorContext {
    pub current_file_path: String,
    #[serde(default)]
    pub current_file_content: String,
    #[serde(default)]
    pub current_file_language: String,
    pub cursor_position: Position,
    pub selection_range: Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InsertTextRequest {
    pub file_path: String,
    pub insert_text: String,
    pub insert_range: Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetSelectionRequest {
    pub selection_range: Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenFileDetails {
    pub file_path: String,
    pub preview: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaveFileDetails {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CloseFileDetails {
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageDetails {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusBarMessageDetails {
    pub message: String,
    /// Milliseconds before the client hides the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}
