//! Output coalescing
//!
//! Command output arrives as many small fragments. Sending one event per
//! fragment floods the client, so fragments are accumulated into a single
//! batch per category and emitted as one `output` event when:
//!
//! - the periodic flush timer fires,
//! - a fragment of the other category arrives (categories never mix within
//!   one event),
//! - the batch reaches the configured size limit,
//! - the session exits (final drain).
//!
//! Append and flush share one mutex and the event is queued while the lock is
//! held, so batches reach the channel in the order they were formed.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn, Span};

use hostbridge_protocol::messages::{methods, OutputCategory, OutputEvent};
use hostbridge_protocol::MessageSender;

use crate::config::OutputConfig;

/// A fragment of output produced by the command engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub text: String,
    pub is_error: bool,
    pub append_newline: bool,
}

impl OutputChunk {
    pub fn new(text: impl Into<String>, is_error: bool, append_newline: bool) -> Self {
        Self {
            text: text.into(),
            is_error,
            append_newline,
        }
    }

    pub fn category(&self) -> OutputCategory {
        OutputCategory::from_is_error(self.is_error)
    }
}

#[derive(Debug)]
struct Batch {
    category: OutputCategory,
    text: String,
}

/// Accumulates output fragments into throttled, category-grouped events
pub struct OutputCoalescer {
    sender: Arc<dyn MessageSender>,
    batch: Mutex<Option<Batch>>,
    max_batch_bytes: usize,
    span: Span,
}

impl OutputCoalescer {
    pub fn new(sender: Arc<dyn MessageSender>, config: &OutputConfig, span: Span) -> Self {
        Self {
            sender,
            batch: Mutex::new(None),
            max_batch_bytes: config.max_batch_bytes,
            span,
        }
    }

    /// Add a fragment to the current batch
    pub fn append(&self, chunk: OutputChunk) {
        let category = chunk.category();
        let mut batch = self.batch.lock();

        let switched = batch
            .as_ref()
            .is_some_and(|current| current.category != category);
        if switched && let Some(previous) = batch.take() {
            self.emit(previous);
        }

        let current = batch.get_or_insert_with(|| Batch {
            category,
            text: String::new(),
        });
        current.text.push_str(&chunk.text);
        if chunk.append_newline {
            current.text.push('\n');
        }

        if self.max_batch_bytes > 0 && current.text.len() >= self.max_batch_bytes {
            trace!(parent: &self.span, bytes = current.text.len(), "Batch limit reached, flushing early");
            if let Some(full) = batch.take() {
                self.emit(full);
            }
        }
    }

    /// Emit the pending batch, if any
    pub fn flush(&self) {
        let mut batch = self.batch.lock();
        if let Some(pending) = batch.take() {
            self.emit(pending);
        }
    }

    /// Whether a batch is waiting to be flushed
    pub fn has_pending(&self) -> bool {
        self.batch.lock().is_some()
    }

    // Called with the batch lock held
    fn emit(&self, batch: Batch) {
        if batch.text.is_empty() {
            return;
        }

        trace!(parent: &self.span, category = ?batch.category, bytes = batch.text.len(), "Emitting output batch");
        let event = OutputEvent {
            output: batch.text,
            category: batch.category,
        };
        if let Err(e) = self.sender.event(methods::OUTPUT, &event) {
            warn!(parent: &self.span, "Failed to send output event: {}", e);
        }
    }

    /// Flush on a fixed interval until `cancel` fires
    pub fn spawn_flush_timer(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let coalescer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => coalescer.flush(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hostbridge_protocol::ChannelError;
    use serde_json::Value;

    #[derive(Default)]
    struct RecordingSender {
        events: Mutex<Vec<OutputEvent>>,
    }

    impl RecordingSender {
        fn events(&self) -> Vec<OutputEvent> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_request(&self, _method: &str, _params: Value) -> Result<Value, ChannelError> {
            Ok(Value::Null)
        }

        fn send_request_no_wait(&self, _method: &str, _params: Value) -> Result<(), ChannelError> {
            Ok(())
        }

        fn send_event(&self, method: &str, params: Value) -> Result<(), ChannelError> {
            assert_eq!(method, methods::OUTPUT);
            self.events.lock().push(serde_json::from_value(params)?);
            Ok(())
        }
    }

    fn coalescer(max_batch_bytes: usize) -> (Arc<OutputCoalescer>, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let config = OutputConfig {
            max_batch_bytes,
            ..OutputConfig::default()
        };
        let coalescer = OutputCoalescer::new(sender.clone(), &config, Span::none());
        (Arc::new(coalescer), sender)
    }

    fn event(output: &str, category: OutputCategory) -> OutputEvent {
        OutputEvent {
            output: output.to_string(),
            category,
        }
    }

    #[test]
    fn test_same_category_appends_concatenate() {
        let (coalescer, sender) = coalescer(0);
        coalescer.append(OutputChunk::new("a", false, true));
        coalescer.append(OutputChunk::new("b", false, false));
        coalescer.append(OutputChunk::new("c", false, true));
        assert!(sender.events().is_empty());

        coalescer.flush();
        assert_eq!(sender.events(), vec![event("a\nbc\n", OutputCategory::Stdout)]);
    }

    #[test]
    fn test_category_switch_flushes_previous_batch() {
        let (coalescer, sender) = coalescer(0);
        coalescer.append(OutputChunk::new("a", false, false));
        coalescer.append(OutputChunk::new("b", true, false));
        assert_eq!(sender.events(), vec![event("a", OutputCategory::Stdout)]);

        coalescer.flush();
        assert_eq!(
            sender.events(),
            vec![
                event("a", OutputCategory::Stdout),
                event("b", OutputCategory::Stderr),
            ]
        );
    }

    #[test]
    fn test_flush_without_batch_emits_nothing() {
        let (coalescer, sender) = coalescer(0);
        coalescer.flush();
        coalescer.flush();
        assert!(sender.events().is_empty());
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn test_batch_limit_flushes_early() {
        let (coalescer, sender) = coalescer(8);
        coalescer.append(OutputChunk::new("1234", false, false));
        assert!(sender.events().is_empty());

        coalescer.append(OutputChunk::new("5678", false, false));
        assert_eq!(sender.events(), vec![event("12345678", OutputCategory::Stdout)]);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_after_window() {
        let (coalescer, sender) = coalescer(0);
        let cancel = CancellationToken::new();
        let timer = coalescer.spawn_flush_timer(Duration::from_millis(200), cancel.clone());

        coalescer.append(OutputChunk::new("line1", false, true));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sender.events().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sender.events(), vec![event("line1\n", OutputCategory::Stdout)]);

        cancel.cancel();
        timer.await.unwrap();
    }
}
