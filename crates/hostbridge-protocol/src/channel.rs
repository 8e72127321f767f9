//! Message channel capabilities and the JSON-RPC implementation
//!
//! ## Design
//!
//! - Outbound messages go through an unbounded mpsc queue drained by a single
//!   writer task, so sends never block the caller
//! - A reader task routes responses to pending requests through oneshot
//!   channels keyed by request id
//! - Inbound requests and notifications are dispatched to registered handlers
//!   on their own tasks, so a slow handler never stalls the reader
//! - When the peer closes the stream every pending request fails with
//!   `ChannelError::Closed` and `closed()` resolves

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::{ChannelError, Result};
use crate::protocol::{Message, Notification, Request, RequestId, Response, ResponseError};
use crate::transport::{MessageReader, MessageWriter, TransportHalves};

/// Handler for an inbound request; the returned value becomes the response
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, std::result::Result<Value, ResponseError>> + Send + Sync>;

/// Handler for an inbound notification
pub type EventHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a `RequestHandler`
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ResponseError>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

/// Wrap an async closure as an `EventHandler`
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

/// Capability to send messages to the remote party
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a request and wait for its response
    async fn send_request(&self, method: &str, params: Value) -> Result<Value>;

    /// Send a request without waiting; the eventual response is discarded
    fn send_request_no_wait(&self, method: &str, params: Value) -> Result<()>;

    /// Send a notification
    fn send_event(&self, method: &str, params: Value) -> Result<()>;
}

impl dyn MessageSender {
    /// Send a typed request and decode the typed response
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.send_request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a typed notification
    pub fn event<P>(&self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        self.send_event(method, serde_json::to_value(params)?)
    }
}

/// Full channel capability: sending plus handler registration and lifetime
#[async_trait]
pub trait MessageChannel: MessageSender {
    /// Register the handler for a request method, replacing any previous one
    fn set_request_handler(&self, method: &str, handler: RequestHandler);

    /// Register the handler for a notification method, replacing any previous one
    fn set_event_handler(&self, method: &str, handler: EventHandler);

    /// Begin reading and writing messages
    async fn start(&self) -> Result<()>;

    /// Flush queued outbound messages and close the transport
    async fn stop(&self) -> Result<()>;

    /// Resolves once the channel is closed, by `stop` or by the peer
    async fn closed(&self);
}

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<Value>>>;

struct Inner {
    outbound_tx: mpsc::UnboundedSender<Message>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    transport: Mutex<Option<TransportHalves>>,
    pending: Mutex<PendingMap>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    event_handlers: RwLock<HashMap<String, EventHandler>>,
    next_id: AtomicI64,
    closed_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

/// JSON-RPC 2.0 channel over a framed transport
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct JsonRpcChannel {
    inner: Arc<Inner>,
}

impl JsonRpcChannel {
    pub fn new((reader, writer): TransportHalves) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                transport: Mutex::new(Some((reader, writer))),
                pending: Mutex::new(HashMap::new()),
                request_handlers: RwLock::new(HashMap::new()),
                event_handlers: RwLock::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                closed_tx,
                cancel: CancellationToken::new(),
                writer_task: Mutex::new(None),
            }),
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.inner
            .outbound_tx
            .send(message)
            .map_err(|_| ChannelError::Closed)
    }
}

impl Inner {
    fn mark_closed(&self) {
        self.closed_tx.send_replace(true);

        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            debug!("Failing {} pending request(s) on close", pending.len());
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(ChannelError::Closed));
        }
    }

    fn respond(&self, response: Response) {
        if self.outbound_tx.send(response.into()).is_err() {
            warn!("Dropping response, channel closed");
        }
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => {
                let tx = self.pending.lock().remove(&response.id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(response.into_result().map_err(ChannelError::from));
                    }
                    None => warn!("Response for unknown request id {}", response.id),
                }
            }
            Message::Request(request) => {
                let handler = self.request_handlers.read().get(&request.method).cloned();
                let Some(handler) = handler else {
                    debug!("No handler for request {}", request.method);
                    self.respond(Response::error(
                        request.id,
                        ResponseError::method_not_found(&request.method),
                    ));
                    return;
                };

                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let response = match handler(request.params).await {
                        Ok(result) => Response::success(request.id, result),
                        Err(e) => {
                            debug!("Request {} failed: {}", request.method, e);
                            Response::error(request.id, e)
                        }
                    };
                    inner.respond(response);
                });
            }
            Message::Notification(notification) => {
                let handler = self
                    .event_handlers
                    .read()
                    .get(&notification.method)
                    .cloned();
                match handler {
                    Some(handler) => {
                        tokio::spawn(handler(notification.params));
                    }
                    None => debug!("No handler for notification {}", notification.method),
                }
            }
        }
    }
}

/// Marks the channel closed when the reader task ends, even by panic
struct CloseOnDrop(Arc<Inner>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.mark_closed();
    }
}

async fn run_reader(inner: Arc<Inner>, mut reader: Box<dyn MessageReader>) {
    let _close = CloseOnDrop(Arc::clone(&inner));
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            next = reader.receive() => next,
        };

        match next {
            Ok(Some(message)) => {
                trace!(?message, "Received message");
                inner.dispatch(message);
            }
            Ok(None) => {
                debug!("Peer closed the stream");
                break;
            }
            Err(e) => {
                error!("Failed to read message: {}", e);
                break;
            }
        }
    }
}

async fn run_writer(
    inner: Arc<Inner>,
    mut writer: Box<dyn MessageWriter>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let message = tokio::select! {
            biased;
            message = outbound_rx.recv() => message,
            _ = inner.cancel.cancelled() => break,
        };
        let Some(message) = message else { break };

        if let Err(e) = writer.send(message).await {
            error!("Failed to write message: {}", e);
            inner.mark_closed();
            return;
        }
    }

    // Drain whatever was queued before the stop request
    while let Ok(message) = outbound_rx.try_recv() {
        if let Err(e) = writer.send(message).await {
            warn!("Failed to flush message during stop: {}", e);
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!("Error closing writer: {}", e);
    }
}

#[async_trait]
impl MessageSender for JsonRpcChannel {
    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);

        let request = Request::new(id.clone(), method).with_params(params);
        if let Err(e) = self.enqueue(request.into()) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        rx.await.unwrap_or(Err(ChannelError::Closed))
    }

    fn send_request_no_wait(&self, method: &str, params: Value) -> Result<()> {
        let request = Request::new(self.next_id(), method).with_params(params);
        self.enqueue(request.into())
    }

    fn send_event(&self, method: &str, params: Value) -> Result<()> {
        self.enqueue(Notification::new(method, Some(params)).into())
    }
}

#[async_trait]
impl MessageChannel for JsonRpcChannel {
    fn set_request_handler(&self, method: &str, handler: RequestHandler) {
        self.inner
            .request_handlers
            .write()
            .insert(method.to_string(), handler);
    }

    fn set_event_handler(&self, method: &str, handler: EventHandler) {
        self.inner
            .event_handlers
            .write()
            .insert(method.to_string(), handler);
    }

    async fn start(&self) -> Result<()> {
        let (reader, writer) = self
            .inner
            .transport
            .lock()
            .take()
            .ok_or(ChannelError::AlreadyStarted)?;
        let outbound_rx = self
            .inner
            .outbound_rx
            .lock()
            .take()
            .ok_or(ChannelError::AlreadyStarted)?;

        tokio::spawn(run_reader(Arc::clone(&self.inner), reader));
        let writer_task = tokio::spawn(run_writer(Arc::clone(&self.inner), writer, outbound_rx));
        *self.inner.writer_task.lock() = Some(writer_task);

        debug!("Channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.cancel.cancel();

        let writer_task = self.inner.writer_task.lock().take();
        if let Some(task) = writer_task
            && let Err(e) = task.await
        {
            warn!("Writer task ended abnormally: {}", e);
        }

        self.inner.mark_closed();
        debug!("Channel stopped");
        Ok(())
    }

    async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
