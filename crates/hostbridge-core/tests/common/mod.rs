//! Shared fakes for the core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use hostbridge_core::{Error, HostConsole, Result, Session, SessionHooks};
use hostbridge_protocol::{
    ChannelError, EventHandler, MessageChannel, MessageSender, RequestHandler, ResponseError,
};

type Reply = std::result::Result<Value, ChannelError>;

/// In-memory channel: records outbound traffic, scripts replies and lets
/// tests play the client side by invoking the registered handlers directly
#[derive(Default)]
pub struct FakeChannel {
    events: Mutex<Vec<(String, Value)>>,
    requests: Mutex<Vec<(String, Value)>>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    held: Mutex<VecDeque<oneshot::Sender<Reply>>>,
    request_handlers: Mutex<HashMap<String, RequestHandler>>,
    event_handlers: Mutex<HashMap<String, EventHandler>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    closed: Mutex<Option<watch::Sender<bool>>>,
    /// Ordered record of lifecycle-relevant calls, shared with `RecordingHooks`
    pub log: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        let channel = Self::default();
        let (closed_tx, _) = watch::channel(false);
        *channel.closed.lock() = Some(closed_tx);
        Arc::new(channel)
    }

    /// Queue the reply for the next request of `method`
    pub fn reply_to(&self, method: &str, reply: Value) {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(reply));
    }

    /// Make the next request of `method` fail
    pub fn fail_next(&self, method: &str, error: ChannelError) {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Number of requests that are waiting for a manual reply
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Wait until at least `count` requests are held
    pub async fn wait_for_held(&self, count: usize) {
        for _ in 0..500 {
            if self.held_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {} held request(s), found {}", count, self.held_count());
    }

    /// Resolve the oldest held request
    pub fn release_next(&self, reply: Reply) {
        let tx = self.held.lock().pop_front().expect("no held request");
        let _ = tx.send(reply);
    }

    pub fn events(&self, method: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn has_request_handler(&self, method: &str) -> bool {
        self.request_handlers.lock().contains_key(method)
    }

    pub fn has_event_handler(&self, method: &str) -> bool {
        self.event_handlers.lock().contains_key(method)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Deliver a request from the client and return the host's reply
    pub async fn client_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, ResponseError> {
        let handler = self
            .request_handlers
            .lock()
            .get(method)
            .cloned()
            .unwrap_or_else(|| panic!("no request handler for {}", method));
        handler(params).await
    }

    /// Deliver a notification from the client and wait for its handler
    pub async fn client_event(&self, method: &str, params: Option<Value>) {
        let handler = self
            .event_handlers
            .lock()
            .get(method)
            .cloned()
            .unwrap_or_else(|| panic!("no event handler for {}", method));
        handler(params).await
    }

    /// Simulate the client dropping the connection
    pub fn close_from_peer(&self) {
        if let Some(tx) = self.closed.lock().as_ref() {
            tx.send_replace(true);
        }
    }
}

#[async_trait]
impl MessageSender for FakeChannel {
    async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, ChannelError> {
        self.requests.lock().push((method.to_string(), params));

        let scripted = self
            .replies
            .lock()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = scripted {
            return reply;
        }

        let (tx, rx) = oneshot::channel();
        self.held.lock().push_back(tx);
        rx.await.unwrap_or(Err(ChannelError::Closed))
    }

    fn send_request_no_wait(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<(), ChannelError> {
        self.requests.lock().push((method.to_string(), params));
        Ok(())
    }

    fn send_event(&self, method: &str, params: Value) -> std::result::Result<(), ChannelError> {
        self.log.lock().push(format!("event:{}", method));
        self.events.lock().push((method.to_string(), params));
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for FakeChannel {
    fn set_request_handler(&self, method: &str, handler: RequestHandler) {
        self.request_handlers
            .lock()
            .insert(method.to_string(), handler);
    }

    fn set_event_handler(&self, method: &str, handler: EventHandler) {
        self.event_handlers
            .lock()
            .insert(method.to_string(), handler);
    }

    async fn start(&self) -> std::result::Result<(), ChannelError> {
        if self.starts.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(ChannelError::AlreadyStarted);
        }
        self.log.lock().push("start".to_string());
        Ok(())
    }

    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("stop".to_string());

        // Outstanding requests fail the way a real transport teardown does
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for tx in held {
            let _ = tx.send(Err(ChannelError::Closed));
        }
        if let Some(tx) = self.closed.lock().as_ref() {
            tx.send_replace(true);
        }
        Ok(())
    }

    async fn closed(&self) {
        let rx = self.closed.lock().as_ref().map(watch::Sender::subscribe);
        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }
}

/// Console that records what was written and how often it was interrupted
#[derive(Default)]
pub struct RecordingConsole {
    text: Mutex<String>,
    interrupts: AtomicUsize,
}

impl RecordingConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

impl HostConsole for RecordingConsole {
    fn write(&self, text: &str) {
        self.text.lock().push_str(text);
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lifecycle hooks that count calls and log them into the channel's log
pub struct RecordingHooks {
    channel: Arc<FakeChannel>,
    initialize_error: Mutex<Option<String>>,
    shutdown_error: Mutex<Option<String>>,
    shutdown_delay: Mutex<Option<Duration>>,
    initialize_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    shutdowns_finished: AtomicUsize,
}

impl RecordingHooks {
    pub fn new(channel: &Arc<FakeChannel>) -> Arc<Self> {
        Arc::new(Self {
            channel: Arc::clone(channel),
            initialize_error: Mutex::new(None),
            shutdown_error: Mutex::new(None),
            shutdown_delay: Mutex::new(None),
            initialize_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            shutdowns_finished: AtomicUsize::new(0),
        })
    }

    pub fn fail_initialize(&self, message: &str) {
        *self.initialize_error.lock() = Some(message.to_string());
    }

    pub fn fail_shutdown(&self, message: &str) {
        *self.shutdown_error.lock() = Some(message.to_string());
    }

    /// Make the shutdown hook take this long before returning
    pub fn slow_shutdown(&self, delay: Duration) {
        *self.shutdown_delay.lock() = Some(delay);
    }

    pub fn shutdowns_finished(&self) -> usize {
        self.shutdowns_finished.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHooks for RecordingHooks {
    async fn initialize(&self, _session: &Arc<Session>) -> Result<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.channel.log.lock().push("initialize".to_string());
        match self.initialize_error.lock().clone() {
            Some(message) => Err(Error::Handler(message)),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.channel.log.lock().push("shutdown".to_string());
        let delay = *self.shutdown_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shutdowns_finished.fetch_add(1, Ordering::SeqCst);
        match self.shutdown_error.lock().clone() {
            Some(message) => Err(Error::Handler(message)),
            None => Ok(()),
        }
    }
}
