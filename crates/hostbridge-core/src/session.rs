//! Session lifecycle
//!
//! A session is one lifetime of the host's connection to the editor client:
//!
//! ```text
//! Created ──start()──▶ Started ──shutdown request──▶ ShuttingDown ──exit──▶ Exited
//!                         │                                                 ▲
//!                         └──────────── exit / stop() / channel closed ─────┘
//! ```
//!
//! States are never re-entered. The `shutdown` request only runs the
//! implementor's shutdown hook; the channel stays up until the `exit`
//! notification (or `stop()`) tears it down. Whatever the path to Exited, the
//! shutdown hook runs exactly once beforehand and the exit signal resolves
//! even if the hook fails.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;

use hostbridge_protocol::messages::methods;
use hostbridge_protocol::protocol::error_codes;
use hostbridge_protocol::{
    event_handler, request_handler, MessageChannel, MessageSender, ResponseError,
};

use crate::config::Config;
use crate::editor::EditorOperations;
use crate::error::{Error, Result};
use crate::host::HostConsole;
use crate::output::{OutputChunk, OutputCoalescer};
use crate::prompt::Prompts;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    ShuttingDown,
    Exited,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Shutdown hook succeeded and the channel was stopped
    Clean,
    /// The shutdown hook failed; the session exited anyway
    ShutdownFailed(String),
    /// The transport went away underneath the session
    ChannelClosed,
    /// The initialize hook failed during `start`
    StartupFailed(String),
}

/// Hooks the implementor plugs into the lifecycle
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Called once during `start`, before the channel starts reading.
    /// Register domain request and event handlers here.
    async fn initialize(&self, session: &Arc<Session>) -> Result<()>;

    /// Called exactly once before the session exits
    async fn shutdown(&self) -> Result<()>;
}

/// Awaitable signal that resolves when the session has exited
#[derive(Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<Option<ExitStatus>>,
}

impl ExitSignal {
    /// Status if the session already exited
    pub fn status(&self) -> Option<ExitStatus> {
        self.rx.borrow().clone()
    }

    pub async fn wait(mut self) -> ExitStatus {
        match self.rx.wait_for(Option::is_some).await {
            Ok(status) => status.clone().unwrap_or(ExitStatus::ChannelClosed),
            // The session was dropped without exiting; nothing can talk to it anymore
            Err(_) => ExitStatus::ChannelClosed,
        }
    }

    /// Block a non-async thread until the session exits
    pub fn wait_blocking(self) -> ExitStatus {
        futures::executor::block_on(self.wait())
    }
}

/// Lifecycle flags guarded together with the state
struct Lifecycle {
    state: SessionState,
    starting: bool,
    exit_requested: bool,
    shutdown_error: Option<String>,
}

/// One host session bound to a message channel
pub struct Session {
    id: Uuid,
    lifecycle: Mutex<Lifecycle>,
    channel: Arc<dyn MessageChannel>,
    hooks: Arc<dyn SessionHooks>,
    output: Arc<OutputCoalescer>,
    prompts: Prompts,
    editor: EditorOperations,
    flush_interval: Duration,
    background: CancellationToken,
    exit_tx: watch::Sender<Option<ExitStatus>>,
    /// Flips to true once the shutdown hook has returned
    shutdown_done: watch::Sender<bool>,
    span: Span,
}

/// What an exit path must do about the shutdown hook
enum HookRun {
    Run,
    /// A `shutdown` request is already running it
    Await,
    Skip,
}

impl HookRun {
    fn for_state(state: SessionState) -> Self {
        match state {
            SessionState::Started => Self::Run,
            SessionState::ShuttingDown => Self::Await,
            SessionState::Created | SessionState::Exited => Self::Skip,
        }
    }
}

impl Session {
    /// Create a session; must be called from within a Tokio runtime
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        hooks: Arc<dyn SessionHooks>,
        console: Arc<dyn HostConsole>,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("Session requires a Tokio runtime: {}", e)))?;

        let id = Uuid::new_v4();
        let span = info_span!("session", %id);
        let sender: Arc<dyn MessageSender> = channel.clone();

        let output = Arc::new(OutputCoalescer::new(
            Arc::clone(&sender),
            &config.output,
            info_span!(parent: &span, "output"),
        ));
        let prompts = Prompts::new(
            Arc::clone(&sender),
            console,
            runtime,
            info_span!(parent: &span, "prompt"),
        );
        let editor = EditorOperations::new(
            sender,
            config.session.workspace_path.clone(),
            &config.editor,
            info_span!(parent: &span, "editor"),
        );
        let (exit_tx, _) = watch::channel(None);
        let (shutdown_done, _) = watch::channel(false);

        Ok(Arc::new(Self {
            id,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Created,
                starting: false,
                exit_requested: false,
                shutdown_error: None,
            }),
            channel,
            hooks,
            output,
            prompts,
            editor,
            flush_interval: config.output.flush_interval(),
            background: CancellationToken::new(),
            exit_tx,
            shutdown_done,
            span,
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    pub fn channel(&self) -> &Arc<dyn MessageChannel> {
        &self.channel
    }

    pub fn output(&self) -> &Arc<OutputCoalescer> {
        &self.output
    }

    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    pub fn editor(&self) -> &EditorOperations {
        &self.editor
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Signal that resolves once the session reaches Exited
    pub fn exited(&self) -> ExitSignal {
        ExitSignal {
            rx: self.exit_tx.subscribe(),
        }
    }

    /// Feed command engine output into the coalescer
    pub fn report_output(&self, text: impl Into<String>, is_error: bool, append_newline: bool) {
        self.output
            .append(OutputChunk::new(text, is_error, append_newline));
    }

    /// Register built-in handlers, run the initialize hook and start the channel
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != SessionState::Created || lifecycle.starting {
                return Err(Error::InvalidState {
                    operation: "start",
                    state: lifecycle.state,
                });
            }
            lifecycle.starting = true;
        }

        self.register_builtin_handlers();

        if let Err(e) = self.hooks.initialize(self).await {
            error!(parent: &self.span, "Initialize hook failed: {}", e);
            self.lifecycle.lock().exit_requested = true;
            self.finish_exit(ExitStatus::StartupFailed(e.to_string()))
                .await;
            return Err(e);
        }

        if let Err(e) = self.channel.start().await {
            error!(parent: &self.span, "Failed to start channel: {}", e);
            self.lifecycle.lock().exit_requested = true;
            self.finish_exit(ExitStatus::StartupFailed(e.to_string()))
                .await;
            return Err(e.into());
        }

        self.lifecycle.lock().state = SessionState::Started;
        self.output
            .spawn_flush_timer(self.flush_interval, self.background.child_token());
        self.spawn_channel_watcher();

        info!(parent: &self.span, "Session started");
        Ok(())
    }

    fn register_builtin_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.channel.set_request_handler(
            methods::SHUTDOWN,
            request_handler(move |_params| {
                let weak = weak.clone();
                async move {
                    let session = upgrade(&weak)?;
                    session
                        .handle_shutdown_request()
                        .await
                        .map(|()| Value::Null)
                        .map_err(|e| ResponseError::new(error_codes::INVALID_REQUEST, e.to_string()))
                }
            }),
        );

        let weak = Arc::downgrade(self);
        self.channel.set_event_handler(
            methods::EXIT,
            event_handler(move |_params| {
                let weak = weak.clone();
                async move {
                    let Ok(session) = upgrade(&weak) else {
                        return;
                    };
                    if let Err(e) = session.stop().await {
                        error!(parent: &session.span, "Exit notification rejected: {}", e);
                    }
                }
            }),
        );
    }

    /// Run the shutdown hook in response to the client's `shutdown` request
    ///
    /// Only valid once, while Started. The channel stays open.
    pub async fn handle_shutdown_request(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != SessionState::Started || lifecycle.exit_requested {
                error!(parent: &self.span, state = ?lifecycle.state, "Unexpected shutdown request");
                return Err(Error::InvalidState {
                    operation: "shut down",
                    state: lifecycle.state,
                });
            }
            lifecycle.state = SessionState::ShuttingDown;
        }

        info!(parent: &self.span, "Shutdown requested");
        self.run_shutdown_hook().await;
        Ok(())
    }

    /// Exit the session: run the shutdown hook if it has not run yet, drain
    /// output, cancel pending prompts, stop the channel and resolve the exit
    /// signal
    pub async fn stop(&self) -> Result<ExitStatus> {
        let hook = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == SessionState::Created || lifecycle.exit_requested {
                return Err(Error::InvalidState {
                    operation: "exit",
                    state: lifecycle.state,
                });
            }
            lifecycle.exit_requested = true;

            let hook = HookRun::for_state(lifecycle.state);
            lifecycle.state = SessionState::ShuttingDown;
            hook
        };

        self.complete_shutdown_hook(hook).await;

        let status = match self.lifecycle.lock().shutdown_error.clone() {
            Some(e) => ExitStatus::ShutdownFailed(e),
            None => ExitStatus::Clean,
        };
        self.finish_exit(status.clone()).await;
        Ok(status)
    }

    async fn run_shutdown_hook(&self) {
        if let Err(e) = self.hooks.shutdown().await {
            error!(parent: &self.span, "Shutdown hook failed: {}", e);
            self.lifecycle.lock().shutdown_error = Some(e.to_string());
        }
        self.shutdown_done.send_replace(true);
    }

    /// Make sure the shutdown hook has finished before tearing anything down
    async fn complete_shutdown_hook(&self, hook: HookRun) {
        match hook {
            HookRun::Run => self.run_shutdown_hook().await,
            HookRun::Await => {
                debug!(parent: &self.span, "Waiting for the running shutdown hook");
                let mut done = self.shutdown_done.subscribe();
                // The sender lives in `self`, so this only returns once the flag is set
                let _ = done.wait_for(|done| *done).await;
            }
            HookRun::Skip => {}
        }
    }

    async fn handle_channel_closed(&self) {
        let hook = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.exit_requested {
                return;
            }
            lifecycle.exit_requested = true;

            let hook = HookRun::for_state(lifecycle.state);
            lifecycle.state = SessionState::ShuttingDown;
            hook
        };

        warn!(parent: &self.span, "Channel closed while the session was running");
        self.complete_shutdown_hook(hook).await;
        self.finish_exit(ExitStatus::ChannelClosed).await;
    }

    fn spawn_channel_watcher(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let channel = Arc::clone(&self.channel);
        let cancel = self.background.child_token();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = channel.closed() => {
                    if let Ok(session) = upgrade(&weak) {
                        session.handle_channel_closed().await;
                    }
                }
            }
        });
    }

    async fn finish_exit(&self, status: ExitStatus) {
        self.background.cancel();
        self.output.flush();

        let cancelled = self.prompts.cancel_all();
        if cancelled > 0 {
            debug!(parent: &self.span, cancelled, "Cancelled pending prompts on exit");
        }

        if let Err(e) = self.channel.stop().await {
            warn!(parent: &self.span, "Failed to stop channel: {}", e);
        }

        self.lifecycle.lock().state = SessionState::Exited;
        info!(parent: &self.span, ?status, "Session exited");
        self.exit_tx.send_replace(Some(status));
    }
}

fn upgrade(weak: &Weak<Session>) -> std::result::Result<Arc<Session>, ResponseError> {
    weak.upgrade()
        .ok_or_else(|| ResponseError::internal("Session is gone"))
}
