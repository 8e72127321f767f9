//! Transport layer for the message channel
//!
//! A transport is split into a reading half and a writing half so the channel
//! can receive and send concurrently from separate tasks.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::ContentLengthCodec;
use crate::error::Result;
use crate::protocol::Message;

/// Receiving half of a transport
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next message, `None` once the peer has closed the stream
    async fn receive(&mut self) -> Result<Option<Message>>;
}

/// Sending half of a transport
#[async_trait]
pub trait MessageWriter: Send {
    async fn send(&mut self, message: Message) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Reader over any byte stream using `Content-Length` framing
pub struct FramedReader<R> {
    inner: FramedRead<R, ContentLengthCodec>,
}

impl<R: AsyncRead + Unpin + Send> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, ContentLengthCodec::new()),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for FramedReader<R> {
    async fn receive(&mut self) -> Result<Option<Message>> {
        self.inner.next().await.transpose()
    }
}

/// Writer over any byte stream using `Content-Length` framing
pub struct FramedWriter<W> {
    inner: FramedWrite<W, ContentLengthCodec>,
}

impl<W: AsyncWrite + Unpin + Send> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, ContentLengthCodec::new()),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for FramedWriter<W> {
    async fn send(&mut self, message: Message) -> Result<()> {
        self.inner.send(message).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Boxed halves ready to hand to a channel
pub type TransportHalves = (Box<dyn MessageReader>, Box<dyn MessageWriter>);

/// Frame an arbitrary reader/writer pair
pub fn framed<R, W>(reader: R, writer: W) -> TransportHalves
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    (
        Box::new(FramedReader::new(reader)),
        Box::new(FramedWriter::new(writer)),
    )
}

/// Transport over the process's own stdin/stdout
pub fn stdio() -> TransportHalves {
    framed(tokio::io::stdin(), tokio::io::stdout())
}
