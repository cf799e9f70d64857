//! Line-delimited JSON encoding and the inbound line buffer.

use crate::error::ProtocolError;
use crate::frame::Framing;
use crate::message::Command;
use bytes::{Bytes, BytesMut};
use serde_json::Value;

/// Encodes commands as newline-terminated JSON lines.
pub struct Encoder;

impl Encoder {
    /// Encodes a command into one JSON line.
    pub fn encode_command(command: &Command) -> Result<BytesMut, ProtocolError> {
        Self::encode_json(command)
    }

    /// Encodes any JSON-serializable value into one JSON line.
    pub fn encode_json<T: serde::Serialize>(value: &T) -> Result<BytesMut, ProtocolError> {
        // Compact JSON never contains a raw newline
        let payload = serde_json::to_vec(value)?;
        Framing::line().encode(&payload)
    }
}

/// One resolved inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A frame that parsed as JSON.
    Message(Value),
    /// A frame that was not valid JSON (or not valid UTF-8).
    Invalid { line: String, reason: String },
}

/// Accumulates received bytes and splits them into trimmed text lines.
///
/// Bytes are buffered before UTF-8 decoding, so chunk boundaries (even ones
/// that split a multi-byte character) never change the resulting lines.
pub struct LineBuffer {
    buffer: BytesMut,
    framing: Framing,
    /// Leading bytes already searched for the delimiter.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_framing(Framing::line())
    }

    /// Creates a buffer that splits on the given delimiter framing.
    pub fn with_framing(framing: Framing) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            framing,
            scanned: 0,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete frame with the delimiter removed, or `None`
    /// if only an unterminated tail remains.
    ///
    /// The unterminated tail is searched once; later calls only scan bytes
    /// appended since.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        self.framing.decode_from(&mut self.buffer, &mut self.scanned)
    }

    /// Returns the next non-blank line, trimmed.
    ///
    /// Whitespace-only lines are consumed and skipped.
    pub fn next_line(&mut self) -> Result<Option<Result<String, Bytes>>, ProtocolError> {
        while let Some(frame) = self.next_frame()? {
            match std::str::from_utf8(&frame) {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        return Ok(Some(Ok(text.to_string())));
                    }
                }
                Err(_) => return Ok(Some(Err(frame))),
            }
        }
        Ok(None)
    }

    /// Returns the next non-blank line parsed as JSON.
    ///
    /// Malformed lines are returned as [`Inbound::Invalid`] rather than as an
    /// error; only framing failures (an oversized line) are errors.
    pub fn next_message(&mut self) -> Result<Option<Inbound>, ProtocolError> {
        let inbound = match self.next_line()? {
            None => return Ok(None),
            Some(Ok(line)) => match serde_json::from_str::<Value>(&line) {
                Ok(value) => Inbound::Message(value),
                Err(e) => Inbound::Invalid {
                    line,
                    reason: e.to_string(),
                },
            },
            Some(Err(raw)) => Inbound::Invalid {
                line: String::from_utf8_lossy(&raw).trim().to_string(),
                reason: ProtocolError::InvalidUtf8.to_string(),
            },
        };
        Ok(Some(inbound))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
