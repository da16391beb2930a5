//! Newline-delimited JSON codec.
//!
//! Encodes [`Command`]s as one JSON record per line and decodes inbound lines
//! into [`Inbound`] items. Malformed input is yielded as
//! [`Inbound::Malformed`] rather than as a codec error: a decoder error would
//! end the `FramedRead` stream, and a bad line must not close the link.

use std::cmp;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Command, DEFAULT_MAX_LINE_LENGTH, Response};
use crate::error::ChannelError;

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed JSON object.
    Record(Response),
    /// A line that could not be decoded, with the reason.
    Malformed(String),
}

/// Line-oriented JSON codec with a bounded line length.
///
/// Lines longer than `max_length` are discarded up to the next newline and
/// reported once as [`Inbound::Malformed`]. Blank lines and a trailing `\r`
/// are ignored.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    /// Index into the buffer already scanned for a newline.
    next_index: usize,
    max_length: usize,
    /// Set while skipping the remainder of an oversized line.
    is_discarding: bool,
}

impl JsonLineCodec {
    /// Creates a codec with the default line limit.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Creates a codec that rejects lines longer than `max_length` bytes.
    #[must_use]
    pub const fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
            is_discarding: false,
        }
    }

    /// Returns the configured line limit.
    #[must_use]
    pub const fn max_length(&self) -> usize {
        self.max_length
    }

    fn oversized(&self) -> Inbound {
        Inbound::Malformed(format!("line exceeds {} bytes", self.max_length))
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes one line (without its `\n`). Returns `None` for blank lines.
fn parse_line(raw: &[u8]) -> Option<Inbound> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let text = match std::str::from_utf8(raw) {
        Ok(s) => s.trim(),
        Err(e) => return Some(Inbound::Malformed(format!("invalid UTF-8: {e}"))),
    };
    if text.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Inbound::Record(map),
        Ok(other) => Inbound::Malformed(format!("expected a JSON object, got {other}")),
        Err(e) => Inbound::Malformed(format!("invalid JSON: {e}")),
    })
}

impl Decoder for JsonLineCodec {
    type Item = Inbound;
    type Error = ChannelError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Inbound>, ChannelError> {
        loop {
            let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.is_discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(offset + self.next_index + 1);
                    self.is_discarding = false;
                    self.next_index = 0;
                    return Ok(Some(self.oversized()));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = offset + self.next_index;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    if let Some(item) = parse_line(&line[..end]) {
                        return Ok(Some(item));
                    }
                }
                (false, None) if buf.len() > self.max_length => {
                    self.is_discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Inbound>, ChannelError> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if self.is_discarding {
            buf.clear();
            self.is_discarding = false;
            return Ok(Some(self.oversized()));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // Last line without a trailing newline.
        let line = buf.split_to(buf.len());
        Ok(parse_line(&line))
    }
}

impl Encoder<Command> for JsonLineCodec {
    type Error = ChannelError;

    fn encode(&mut self, command: Command, buf: &mut BytesMut) -> Result<(), ChannelError> {
        let record = serde_json::to_vec(&command)?;
        buf.reserve(record.len() + 1);
        buf.put_slice(&record);
        buf.put_u8(b'\n');
        Ok(())
    }
}
