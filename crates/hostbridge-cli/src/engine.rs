//! Shell command engine hosted by the session
//!
//! The client sends `evaluate` requests carrying a command line. Each one runs
//! through the platform shell in the workspace directory; its stdout and
//! stderr stream line by line into the session output, and the reply carries
//! the exit code. Evaluations run one at a time.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock, Weak};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hostbridge_core::{HostConsole, Result, Session, SessionHooks};
use hostbridge_protocol::{request_handler, ResponseError};

/// Request method handled by the engine
pub const EVALUATE: &str = "evaluate";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EvaluateRequest {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EvaluateResponse {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub interrupted: bool,
}

/// Console that writes into the session's output stream
///
/// `interrupt` kills the evaluation in flight.
#[derive(Default)]
pub struct EngineConsole {
    session: OnceLock<Weak<Session>>,
    evaluation: Mutex<Option<CancellationToken>>,
}

impl EngineConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn attach(&self, session: &Arc<Session>) {
        let _ = self.session.set(Arc::downgrade(session));
    }

    #[cfg(test)]
    fn is_evaluating(&self) -> bool {
        self.evaluation.lock().is_some()
    }

    fn begin_evaluation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.evaluation.lock() = Some(token.clone());
        token
    }

    fn end_evaluation(&self) {
        *self.evaluation.lock() = None;
    }
}

impl HostConsole for EngineConsole {
    fn write(&self, text: &str) {
        if let Some(session) = self.session.get().and_then(Weak::upgrade) {
            session.report_output(text, false, false);
        }
    }

    fn interrupt(&self) {
        if let Some(token) = self.evaluation.lock().as_ref() {
            debug!("Interrupting evaluation");
            token.cancel();
        }
    }
}

struct EngineState {
    console: Arc<EngineConsole>,
    workspace: PathBuf,
    running: tokio::sync::Mutex<()>,
}

/// Session hooks that register the shell engine's handlers
pub struct ShellEngine {
    state: Arc<EngineState>,
}

impl ShellEngine {
    pub fn new(console: Arc<EngineConsole>, workspace: PathBuf) -> Self {
        Self {
            state: Arc::new(EngineState {
                console,
                workspace,
                running: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

#[async_trait]
impl SessionHooks for ShellEngine {
    async fn initialize(&self, session: &Arc<Session>) -> Result<()> {
        self.state.console.attach(session);

        let weak = Arc::downgrade(session);
        let state = Arc::clone(&self.state);
        session.channel().set_request_handler(
            EVALUATE,
            request_handler(move |params| {
                let weak = weak.clone();
                let state = Arc::clone(&state);
                async move {
                    let request: EvaluateRequest =
                        serde_json::from_value(params.unwrap_or(Value::Null))
                            .map_err(ResponseError::invalid_params)?;
                    let session = weak
                        .upgrade()
                        .ok_or_else(|| ResponseError::internal("Session is gone"))?;

                    let response = state
                        .evaluate(&session, &request.expression)
                        .await
                        .map_err(ResponseError::internal)?;
                    serde_json::to_value(response).map_err(ResponseError::internal)
                }
            }),
        );

        info!(workspace = %self.state.workspace.display(), "Shell engine ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.console.interrupt();
        // Wait for an interrupted evaluation to wind down
        let _running = self.state.running.lock().await;
        debug!("Shell engine stopped");
        Ok(())
    }
}

impl EngineState {
    async fn evaluate(
        &self,
        session: &Arc<Session>,
        expression: &str,
    ) -> std::io::Result<EvaluateResponse> {
        let _running = self.running.lock().await;
        let cancel = self.console.begin_evaluation();
        let result = run_command(session, &self.workspace, expression, cancel).await;
        self.console.end_evaluation();
        result
    }
}

async fn run_command(
    session: &Arc<Session>,
    workspace: &Path,
    expression: &str,
    cancel: CancellationToken,
) -> std::io::Result<EvaluateResponse> {
    debug!(expression, "Evaluating");
    let mut child = shell_command(expression)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = pump(child.stdout.take(), Arc::clone(session), false);
    let stderr = pump(child.stderr.take(), Arc::clone(session), true);

    let (status, interrupted) = tokio::select! {
        status = child.wait() => (status?, false),
        _ = cancel.cancelled() => {
            child.kill().await?;
            (child.wait().await?, true)
        }
    };

    for task in [stdout, stderr] {
        // Grandchildren of a killed shell may keep the pipes open
        if interrupted {
            task.abort();
            continue;
        }
        if let Err(e) = task.await {
            warn!("Output reader ended abnormally: {}", e);
        }
    }

    debug!(code = ?status.code(), interrupted, "Evaluation finished");
    Ok(EvaluateResponse {
        exit_code: status.code(),
        interrupted,
    })
}

/// Forward a child stream to the session output, one line at a time
fn pump<R>(reader: Option<R>, session: Arc<Session>, is_error: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => session.report_output(line, is_error, true),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read command output: {}", e);
                    break;
                }
            }
        }
    })
}

fn shell_command(expression: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(expression);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(expression);
        command
    }
}
