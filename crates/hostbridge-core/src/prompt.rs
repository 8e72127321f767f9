//! Prompt bridging
//!
//! The command engine asks for user input synchronously, from its own
//! evaluation thread, while the answer has to come from the editor client over
//! the asynchronous channel. A `PromptBridge` turns one into the other:
//!
//! 1. `show` renders the prompt on the local console, reserves the pending
//!    slot and spawns a listener task that sends the request and waits for
//!    the one reply.
//! 2. `read_response` blocks the evaluation thread on the slot.
//! 3. The listener resolves the slot: a reply echoes its text locally, a
//!    cancelled or failed request raises the host interrupt instead.
//!
//! There is one bridge per prompt kind and at most one outstanding prompt per
//! bridge. Prompts are not timed out: a client that never answers keeps the
//! evaluation thread waiting until the session exits and cancels the slot.

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, Instrument, Span};

use hostbridge_protocol::messages::{
    methods, ChoiceDetails, ShowChoicePromptRequest, ShowInputPromptRequest, ShowPromptResponse,
};
use hostbridge_protocol::{ChannelError, MessageSender};

use crate::error::{Error, Result};
use crate::host::HostConsole;

/// The two kinds of prompt the engine can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Choice,
    Input,
}

impl PromptKind {
    /// Request method used to forward this kind of prompt
    pub fn method(self) -> &'static str {
        match self {
            PromptKind::Choice => methods::SHOW_CHOICE_PROMPT,
            PromptKind::Input => methods::SHOW_INPUT_PROMPT,
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Choice => write!(f, "choice"),
            PromptKind::Input => write!(f, "input"),
        }
    }
}

/// A prompt raised by the command engine
#[derive(Debug, Clone, PartialEq)]
pub enum PromptRequest {
    Choice(ShowChoicePromptRequest),
    Input(ShowInputPromptRequest),
}

impl PromptRequest {
    pub fn kind(&self) -> PromptKind {
        match self {
            PromptRequest::Choice(_) => PromptKind::Choice,
            PromptRequest::Input(_) => PromptKind::Input,
        }
    }

    fn validate(&self) -> Result<()> {
        let PromptRequest::Choice(choice) = self else {
            return Ok(());
        };

        if choice.choices.is_empty() {
            return Err(Error::InvalidPrompt("choice prompt has no choices".to_string()));
        }
        if let Some(index) = choice
            .default_choices
            .iter()
            .find(|&&index| index >= choice.choices.len())
        {
            return Err(Error::InvalidPrompt(format!(
                "default choice {} out of range",
                index
            )));
        }
        if !choice.is_multi_choice && choice.default_choices.len() > 1 {
            return Err(Error::InvalidPrompt(
                "single choice prompt has several defaults".to_string(),
            ));
        }
        Ok(())
    }

    fn to_params(&self) -> Result<Value> {
        let params = match self {
            PromptRequest::Choice(choice) => serde_json::to_value(choice)?,
            PromptRequest::Input(input) => serde_json::to_value(input)?,
        };
        Ok(params)
    }

    /// Text shown on the local console before the prompt is forwarded
    pub fn render(&self) -> String {
        match self {
            PromptRequest::Choice(choice) => render_choice(choice),
            PromptRequest::Input(input) => {
                let label = if input.label.is_empty() {
                    &input.name
                } else {
                    &input.label
                };
                format!("{}: ", label)
            }
        }
    }
}

/// Split a choice label into its hot key and display text
///
/// `"&Yes"` marks `Y` as the hot key and displays as `Yes`.
fn parse_choice_label(label: &str) -> (Option<char>, String) {
    match label.find('&') {
        Some(pos) => {
            let hot_key = label[pos + 1..]
                .chars()
                .next()
                .map(|c| c.to_ascii_uppercase());
            let display = format!("{}{}", &label[..pos], &label[pos + 1..]);
            (hot_key, display)
        }
        None => (None, label.to_string()),
    }
}

fn render_choice(request: &ShowChoicePromptRequest) -> String {
    let mut out = String::new();
    if !request.caption.is_empty() {
        out.push_str(&request.caption);
        out.push('\n');
    }
    if !request.message.is_empty() {
        out.push_str(&request.message);
        out.push('\n');
    }

    let keys: Vec<String> = request
        .choices
        .iter()
        .enumerate()
        .map(|(index, choice)| match parse_choice_label(&choice.label).0 {
            Some(key) => key.to_string(),
            None => index.to_string(),
        })
        .collect();

    let options: Vec<String> = request
        .choices
        .iter()
        .zip(&keys)
        .map(|(choice, key)| format!("[{}] {}", key, parse_choice_label(&choice.label).1))
        .collect();
    out.push_str(&options.join("  "));

    if request.choices.iter().any(|c| !c.help_message.is_empty()) {
        out.push_str("  [?] Help");
    }

    if !request.default_choices.is_empty() {
        let defaults: Vec<String> = request
            .default_choices
            .iter()
            .filter_map(|&index| keys.get(index))
            .map(|key| format!("\"{}\"", key))
            .collect();
        out.push_str(&format!(" (default is {})", defaults.join(",")));
    }

    out.push_str(": ");
    out
}

/// How an outstanding prompt was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Response(String),
    Cancelled,
}

/// The single pending slot of a bridge
struct PendingSlot {
    generation: u64,
    /// Taken by whoever resolves the slot
    responder: Option<oneshot::Sender<PromptOutcome>>,
    /// Taken by the reader blocked in `read_response`
    receiver: Option<oneshot::Receiver<PromptOutcome>>,
}

/// Bridges one kind of synchronous prompt to the remote client
pub struct PromptBridge {
    kind: PromptKind,
    sender: Arc<dyn MessageSender>,
    console: Arc<dyn HostConsole>,
    runtime: Handle,
    slot: Mutex<Option<PendingSlot>>,
    next_generation: AtomicU64,
    span: Span,
}

impl PromptBridge {
    pub fn new(
        kind: PromptKind,
        sender: Arc<dyn MessageSender>,
        console: Arc<dyn HostConsole>,
        runtime: Handle,
        span: Span,
    ) -> Self {
        Self {
            kind,
            sender,
            console,
            runtime,
            slot: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            span,
        }
    }

    pub fn kind(&self) -> PromptKind {
        self.kind
    }

    /// Whether a prompt is outstanding (shown and not yet consumed)
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Render the prompt locally and forward it to the client
    ///
    /// Fails with `Error::PromptPending` while an earlier prompt of the same
    /// kind has not been consumed by `read_response`.
    pub fn show(self: &Arc<Self>, request: PromptRequest) -> Result<()> {
        if request.kind() != self.kind {
            return Err(Error::InvalidPrompt(format!(
                "{} prompt sent to the {} bridge",
                request.kind(),
                self.kind
            )));
        }
        request.validate()?;
        let params = request.to_params()?;

        let generation = {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return Err(Error::PromptPending(self.kind));
            }

            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let (responder, receiver) = oneshot::channel();
            *slot = Some(PendingSlot {
                generation,
                responder: Some(responder),
                receiver: Some(receiver),
            });
            generation
        };

        self.console.write(&request.render());
        debug!(parent: &self.span, kind = %self.kind, generation, "Prompt shown");

        let bridge = Arc::clone(self);
        self.runtime.spawn(
            async move {
                let reply = bridge.sender.send_request(bridge.kind.method(), params).await;
                bridge.resolve(generation, reply);
            }
            .instrument(self.span.clone()),
        );

        Ok(())
    }

    fn resolve(&self, generation: u64, reply: std::result::Result<Value, ChannelError>) {
        let outcome = match reply {
            Ok(value) => match serde_json::from_value::<ShowPromptResponse>(value) {
                Ok(response) if !response.prompt_cancelled => {
                    PromptOutcome::Response(response.response_text.unwrap_or_default())
                }
                Ok(_) => {
                    debug!(parent: &self.span, kind = %self.kind, "Prompt cancelled by client");
                    PromptOutcome::Cancelled
                }
                Err(e) => {
                    error!(parent: &self.span, kind = %self.kind, "Malformed prompt response: {}", e);
                    PromptOutcome::Cancelled
                }
            },
            Err(e) => {
                error!(parent: &self.span, kind = %self.kind, "Prompt request failed: {}", e);
                PromptOutcome::Cancelled
            }
        };

        let responder = {
            let mut slot = self.slot.lock();
            match slot.as_mut() {
                Some(pending) if pending.generation == generation => {
                    let responder = pending.responder.take();
                    if pending.receiver.is_none() {
                        // The reader already holds the receiver; the slot is free again
                        *slot = None;
                    }
                    responder
                }
                _ => None,
            }
        };

        let Some(responder) = responder else {
            debug!(parent: &self.span, kind = %self.kind, generation, "Dropping reply for a prompt that is no longer pending");
            return;
        };

        match &outcome {
            PromptOutcome::Response(text) => {
                self.console.write(text);
                self.console.write("\n");
            }
            PromptOutcome::Cancelled => self.console.interrupt(),
        }

        let _ = responder.send(outcome);
    }

    fn take_receiver(&self) -> Result<(u64, oneshot::Receiver<PromptOutcome>)> {
        let mut slot = self.slot.lock();
        slot.as_mut()
            .and_then(|pending| {
                pending
                    .receiver
                    .take()
                    .map(|receiver| (pending.generation, receiver))
            })
            .ok_or(Error::NoPendingPrompt(self.kind))
    }

    fn finish(
        &self,
        generation: u64,
        outcome: std::result::Result<PromptOutcome, oneshot::error::RecvError>,
    ) -> Result<String> {
        {
            let mut slot = self.slot.lock();
            if slot
                .as_ref()
                .is_some_and(|pending| pending.generation == generation)
            {
                *slot = None;
            }
        }

        match outcome {
            Ok(PromptOutcome::Response(text)) => Ok(text),
            Ok(PromptOutcome::Cancelled) | Err(_) => Err(Error::PromptCancelled),
        }
    }

    /// Block the calling thread until the outstanding prompt resolves
    ///
    /// Must be called from the engine's own thread, never from inside the
    /// async runtime.
    pub fn read_response(&self) -> Result<String> {
        let (generation, receiver) = self.take_receiver()?;
        let outcome = receiver.blocking_recv();
        self.finish(generation, outcome)
    }

    /// Await the outstanding prompt from async code
    pub async fn read_response_async(&self) -> Result<String> {
        let (generation, receiver) = self.take_receiver()?;
        let outcome = receiver.await;
        self.finish(generation, outcome)
    }

    /// Resolve an outstanding prompt as cancelled
    ///
    /// Returns true if a prompt was waiting for its reply.
    pub fn cancel_pending(&self) -> bool {
        let responder = {
            let mut slot = self.slot.lock();
            match slot.as_mut() {
                Some(pending) => {
                    let responder = pending.responder.take();
                    if pending.receiver.is_none() {
                        *slot = None;
                    }
                    responder
                }
                None => None,
            }
        };

        match responder {
            Some(responder) => {
                debug!(parent: &self.span, kind = %self.kind, "Cancelling pending prompt");
                let _ = responder.send(PromptOutcome::Cancelled);
                true
            }
            None => false,
        }
    }
}

/// The choice and input bridges of one session
pub struct Prompts {
    choice: Arc<PromptBridge>,
    input: Arc<PromptBridge>,
}

impl Prompts {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        console: Arc<dyn HostConsole>,
        runtime: Handle,
        span: Span,
    ) -> Self {
        let bridge = |kind| {
            Arc::new(PromptBridge::new(
                kind,
                Arc::clone(&sender),
                Arc::clone(&console),
                runtime.clone(),
                span.clone(),
            ))
        };
        Self {
            choice: bridge(PromptKind::Choice),
            input: bridge(PromptKind::Input),
        }
    }

    pub fn bridge(&self, kind: PromptKind) -> &Arc<PromptBridge> {
        match kind {
            PromptKind::Choice => &self.choice,
            PromptKind::Input => &self.input,
        }
    }

    /// Show a choice prompt and block until the client answers
    pub fn show_choice_prompt(
        &self,
        caption: impl Into<String>,
        message: impl Into<String>,
        choices: Vec<ChoiceDetails>,
        default_choices: Vec<usize>,
        is_multi_choice: bool,
    ) -> Result<String> {
        self.choice
            .show(PromptRequest::Choice(ShowChoicePromptRequest {
                is_multi_choice,
                caption: caption.into(),
                message: message.into(),
                choices,
                default_choices,
            }))?;
        self.choice.read_response()
    }

    /// Show an input prompt and block until the client answers
    pub fn show_input_prompt(
        &self,
        name: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<String> {
        self.input
            .show(PromptRequest::Input(ShowInputPromptRequest {
                name: name.into(),
                label: label.into(),
            }))?;
        self.input.read_response()
    }

    /// Cancel every outstanding prompt; returns how many were waiting
    pub fn cancel_all(&self) -> usize {
        [&self.choice, &self.input]
            .into_iter()
            .filter(|bridge| bridge.cancel_pending())
            .count()
    }
}
