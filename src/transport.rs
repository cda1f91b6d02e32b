//! Newline-delimited JSON message framing.
//!
//! The tracker server speaks JSON text over a plain TCP stream, one message
//! per line. This module provides the framing boundary between raw bytes and
//! complete message payloads.
//!
//! # Wire Format
//!
//! ```text
//! {"category":"tracker","request":"get","values":["version"]}\n
//! ```
//!
//! Blank lines are tolerated and skipped (some server builds emit them as
//! keep-alives). A trailing `\r` is stripped so CRLF peers work too.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (1MB) to prevent OOM from malicious/buggy servers.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Framing-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the stream.
    #[error("connection closed by server")]
    Closed,

    /// A single message exceeded [`MAX_MESSAGE_SIZE`].
    #[error("message exceeds {MAX_MESSAGE_SIZE} byte limit")]
    Oversized,

    /// The message body is not valid UTF-8.
    #[error("message body is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one complete message from the stream.
///
/// Accumulates bytes until the next newline, skipping blank lines, and
/// returns the message body without its terminator.
///
/// # Errors
///
/// Returns an error if the stream is closed (EOF), a message exceeds
/// [`MAX_MESSAGE_SIZE`], the body is not UTF-8, or the read itself fails.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, TransportError> {
    let mut body: Vec<u8> = Vec::new();

    loop {
        let (consumed, terminated) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                // EOF; a partial trailing message is dropped with the stream
                return Err(TransportError::Closed);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    body.extend_from_slice(&available[..pos]);
                    (pos + 1, true)
                }
                None => {
                    body.extend_from_slice(available);
                    (available.len(), false)
                }
            }
        };
        reader.consume(consumed);

        if body.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::Oversized);
        }

        if terminated {
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                // blank keep-alive line
                body.clear();
                continue;
            }
            break;
        }
    }

    if body.last() == Some(&b'\r') {
        body.pop();
    }

    Ok(String::from_utf8(body)?)
}

/// Write one message to the stream, terminated by a newline, and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &str,
) -> Result<(), TransportError> {
    writer.write_all(body.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
