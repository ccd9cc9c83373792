//! Incremental JSON frame extraction for a raw byte stream.
//!
//! The control protocol does not length-prefix its messages: a frame is
//! complete when the buffered prefix parses as one full top-level JSON
//! value. This module owns the decode buffer, appending each received
//! chunk and extracting as many complete values as the buffer holds,
//! while retaining the unconsumed tail (at most one partial value) for
//! the next chunk.
//!
//! # Wire Format
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"result":{...}}\r\n{"jsonrpc":"2.0","method":...
//! ```
//!
//! The CRLF between messages is whitespace to the parser and is skipped.

use serde_json::Value;

/// Incremental decoder turning byte chunks into complete JSON values.
///
/// The buffer is compacted on `push` once a prefix has been consumed, so
/// a long-lived connection does not grow the allocation without bound.
///
/// # Example
///
/// ```ignore
/// let mut decoder = FrameDecoder::new();
/// decoder.push(br#"{"id":1,"result":{}}{"met"#);
/// assert!(decoder.next_value()?.is_some()); // first value, complete
/// assert!(decoder.next_value()?.is_none()); // `{"met` retained
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Accumulated bytes: consumed prefix + zero or more complete values
    /// + at most one partial value.
    buf: Vec<u8>,
    /// Bytes already extracted as complete values.
    consumed: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received chunk, compacting the consumed prefix first.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.consumed > 0 {
            self.buf.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete JSON value, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when the remaining tail is empty, whitespace-only
    /// or a structurally incomplete value (it is retained for the next
    /// chunk). Returns `Err` for content that can never parse as JSON;
    /// that error is fatal for the connection - no resynchronization is
    /// attempted.
    pub fn next_value(&mut self) -> Result<Option<Value>, serde_json::Error> {
        let tail = &self.buf[self.consumed..];
        let mut stream = serde_json::Deserializer::from_slice(tail).into_iter::<Value>();

        match stream.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                self.consumed += stream.byte_offset();
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e),
        }
    }

    /// Bytes currently retained and not yet extracted as a value.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len() - self.consumed
    }
}
