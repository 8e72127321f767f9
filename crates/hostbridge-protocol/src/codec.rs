//! `Content-Length` framing for JSON-RPC messages
//!
//! Each message is preceded by a header block terminated by an empty line:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"exit"}
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ChannelError;
use crate::protocol::Message;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEADER_BYTES: usize = 8 * 1024;
/// Largest body a peer may announce
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Codec for `Content-Length` framed JSON messages
#[derive(Debug, Default)]
pub struct ContentLengthCodec {
    /// Body length of the frame currently being read, once its header is parsed
    content_length: Option<usize>,
}

impl ContentLengthCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(header: &[u8]) -> Result<usize, ChannelError> {
    let header = std::str::from_utf8(header)
        .map_err(|e| ChannelError::Protocol(format!("Header is not UTF-8: {}", e)))?;

    for line in header.split("\r\n") {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let len: usize = value
                .trim()
                .parse()
                .map_err(|e| ChannelError::Protocol(format!("Invalid content length: {}", e)))?;
            if len > MAX_CONTENT_LENGTH {
                return Err(ChannelError::Protocol(format!(
                    "Content length {} exceeds the {} byte limit",
                    len, MAX_CONTENT_LENGTH
                )));
            }
            return Ok(len);
        }
    }

    Err(ChannelError::Protocol(
        "Missing Content-Length header".to_string(),
    ))
}

impl Decoder for ContentLengthCodec {
    type Item = Message;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ChannelError> {
        let content_length = match self.content_length {
            Some(len) => len,
            None => {
                let Some(end) = find_terminator(src) else {
                    if src.len() > MAX_HEADER_BYTES {
                        return Err(ChannelError::Protocol("Header too large".to_string()));
                    }
                    return Ok(None);
                };
                let len = parse_content_length(&src[..end])?;
                src.advance(end + HEADER_TERMINATOR.len());
                self.content_length = Some(len);
                len
            }
        };

        if src.len() < content_length {
            src.reserve(content_length - src.len());
            return Ok(None);
        }

        let body = src.split_to(content_length);
        self.content_length = None;

        let message = serde_json::from_slice(&body)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for ContentLengthCodec {
    type Error = ChannelError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(&message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
