//! Editor operations integration tests

mod common;

use common::FakeChannel;
use hostbridge_core::{BufferPosition, BufferRange, EditorConfig, EditorOperations, Error};
use hostbridge_protocol::messages::methods;
use hostbridge_protocol::ChannelError;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

fn editor_with(config: EditorConfig) -> (EditorOperations, Arc<FakeChannel>) {
    let channel = FakeChannel::new();
    let editor = EditorOperations::new(
        channel.clone(),
        Some(PathBuf::from("/work/project")),
        &config,
        Span::none(),
    );
    (editor, channel)
}

fn editor() -> (EditorOperations, Arc<FakeChannel>) {
    editor_with(EditorConfig::default())
}

mod context_tests {
    use super::*;

    #[tokio::test]
    async fn test_editor_context_is_translated_to_one_based() {
        let (editor, channel) = editor();
        channel.reply_to(
            methods::GET_EDITOR_CONTEXT,
            json!({
                "CurrentFilePath": "/work/project/src/main.ps1",
                "CurrentFileContent": "Write-Host hi\n",
                "CurrentFileLanguage": "powershell",
                "CursorPosition": { "Line": 0, "Character": 5 },
                "SelectionRange": {
                    "Start": { "Line": 0, "Character": 0 },
                    "End": { "Line": 2, "Character": 3 }
                }
            }),
        );

        let context = editor.get_editor_context().await.unwrap();
        assert_eq!(context.file_path, PathBuf::from("/work/project/src/main.ps1"));
        assert_eq!(context.language, "powershell");
        assert_eq!(context.cursor_position, BufferPosition::new(1, 6));
        assert_eq!(
            context.selection_range,
            BufferRange::new(BufferPosition::new(1, 1), BufferPosition::new(3, 4))
        );
    }

    #[tokio::test]
    async fn test_malformed_context_is_an_error() {
        let (editor, channel) = editor();
        channel.reply_to(methods::GET_EDITOR_CONTEXT, json!({ "CurrentFilePath": 7 }));
        assert!(editor.get_editor_context().await.is_err());
    }
}

mod edit_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_text_sends_zero_based_range() {
        let (editor, channel) = editor();
        channel.reply_to(methods::INSERT_TEXT, Value::Null);

        let range = BufferRange::new(BufferPosition::new(5, 3), BufferPosition::new(5, 8));
        editor
            .insert_text(Path::new("/work/project/a.ps1"), "Get-Item", range)
            .await
            .unwrap();

        assert_eq!(
            channel.requests(methods::INSERT_TEXT),
            vec![json!({
                "FilePath": "/work/project/a.ps1",
                "InsertText": "Get-Item",
                "InsertRange": {
                    "Start": { "Line": 4, "Character": 2 },
                    "End": { "Line": 4, "Character": 7 }
                }
            })]
        );
    }

    #[tokio::test]
    async fn test_set_selection_translates_both_ends() {
        let (editor, channel) = editor();
        channel.reply_to(methods::SET_SELECTION, Value::Null);

        editor
            .set_selection(BufferRange::at(BufferPosition::new(1, 1)))
            .await
            .unwrap();

        assert_eq!(
            channel.requests(methods::SET_SELECTION),
            vec![json!({
                "SelectionRange": {
                    "Start": { "Line": 0, "Character": 0 },
                    "End": { "Line": 0, "Character": 0 }
                }
            })]
        );
    }

    #[tokio::test]
    async fn test_file_operations_payloads() {
        let (editor, channel) = editor();
        for method in [
            methods::NEW_FILE,
            methods::OPEN_FILE,
            methods::SAVE_FILE,
            methods::SAVE_FILE,
            methods::CLOSE_FILE,
        ] {
            channel.reply_to(method, Value::Null);
        }

        editor.new_file().await.unwrap();
        editor
            .open_file(Path::new("/work/project/a.ps1"), true)
            .await
            .unwrap();
        editor
            .save_file(Path::new("/work/project/a.ps1"), None)
            .await
            .unwrap();
        editor
            .save_file(
                Path::new("/work/project/a.ps1"),
                Some(Path::new("/work/project/b.ps1")),
            )
            .await
            .unwrap();
        editor
            .close_file(Path::new("/work/project/b.ps1"))
            .await
            .unwrap();

        assert_eq!(channel.requests(methods::NEW_FILE), vec![json!({})]);
        assert_eq!(
            channel.requests(methods::OPEN_FILE),
            vec![json!({ "FilePath": "/work/project/a.ps1", "Preview": true })]
        );
        assert_eq!(
            channel.requests(methods::SAVE_FILE),
            vec![
                json!({ "FilePath": "/work/project/a.ps1" }),
                json!({ "FilePath": "/work/project/a.ps1", "NewPath": "/work/project/b.ps1" }),
            ]
        );
        assert_eq!(
            channel.requests(methods::CLOSE_FILE),
            vec![json!({ "FilePath": "/work/project/b.ps1" })]
        );
    }

    #[tokio::test]
    async fn test_request_failure_propagates() {
        let (editor, channel) = editor();
        channel.fail_next(
            methods::OPEN_FILE,
            ChannelError::Remote {
                code: -32603,
                message: "no such file".to_string(),
            },
        );

        let err = editor
            .open_file(Path::new("/missing.ps1"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Channel(ChannelError::Remote { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let (editor, channel) = editor_with(EditorConfig {
            request_timeout_ms: Some(50),
        });

        let err = editor.new_file().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(50)));
        assert_eq!(channel.held_count(), 1);
    }
}

mod message_tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_use_their_own_methods() {
        let (editor, channel) = editor();
        for method in [
            methods::SHOW_INFORMATION_MESSAGE,
            methods::SHOW_WARNING_MESSAGE,
            methods::SHOW_ERROR_MESSAGE,
        ] {
            channel.reply_to(method, Value::Null);
        }

        editor.show_information_message("info").await.unwrap();
        editor.show_warning_message("careful").await.unwrap();
        editor.show_error_message("broken").await.unwrap();

        assert_eq!(
            channel.requests(methods::SHOW_INFORMATION_MESSAGE),
            vec![json!({ "Message": "info" })]
        );
        assert_eq!(
            channel.requests(methods::SHOW_WARNING_MESSAGE),
            vec![json!({ "Message": "careful" })]
        );
        assert_eq!(
            channel.requests(methods::SHOW_ERROR_MESSAGE),
            vec![json!({ "Message": "broken" })]
        );
    }

    #[tokio::test]
    async fn test_status_bar_timeout_is_milliseconds() {
        let (editor, channel) = editor();
        channel.reply_to(methods::SET_STATUS_BAR_MESSAGE, Value::Null);
        channel.reply_to(methods::SET_STATUS_BAR_MESSAGE, Value::Null);

        editor
            .set_status_bar_message("Running", Some(Duration::from_secs(2)))
            .await
            .unwrap();
        editor.set_status_bar_message("Idle", None).await.unwrap();

        assert_eq!(
            channel.requests(methods::SET_STATUS_BAR_MESSAGE),
            vec![
                json!({ "Message": "Running", "Timeout": 2000 }),
                json!({ "Message": "Idle" }),
            ]
        );
    }
}

mod workspace_tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_path() {
        let (editor, _channel) = editor();
        assert_eq!(editor.get_workspace_path(), Some(Path::new("/work/project")));
    }

    #[tokio::test]
    async fn test_workspace_relative_path() {
        let (editor, _channel) = editor();
        assert_eq!(
            editor.get_workspace_relative_path(Path::new("/work/project/src/a.ps1")),
            PathBuf::from("src/a.ps1")
        );
        assert_eq!(
            editor.get_workspace_relative_path(Path::new("/elsewhere/b.ps1")),
            PathBuf::from("/elsewhere/b.ps1")
        );
    }

    #[tokio::test]
    async fn test_no_workspace_leaves_paths_unchanged() {
        let channel = FakeChannel::new();
        let editor = EditorOperations::new(channel, None, &EditorConfig::default(), Span::none());
        assert!(editor.get_workspace_path().is_none());
        assert_eq!(
            editor.get_workspace_relative_path(Path::new("src/a.ps1")),
            PathBuf::from("src/a.ps1")
        );
    }
}
