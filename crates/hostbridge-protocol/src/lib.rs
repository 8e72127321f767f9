//! Hostbridge protocol - message channel for editor integration hosts
//!
//! This crate provides the capability traits the session core consumes
//! (`MessageSender`, `MessageChannel`), the wire payloads exchanged with the
//! editor client, and a reference JSON-RPC channel over `Content-Length`
//! framed streams.

pub mod channel;
pub mod codec;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use channel::{
    event_handler, request_handler, EventHandler, JsonRpcChannel, MessageChannel, MessageSender,
    RequestHandler,
};
pub use error::{ChannelError, Result};
pub use protocol::{Message, Notification, Request, RequestId, Response, ResponseError};

/// JSON-RPC protocol version carried in every message
pub const JSONRPC_VERSION: &str = "2.0";
