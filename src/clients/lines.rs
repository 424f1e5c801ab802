//! Line reassembly for newline-delimited streaming bodies.
//!
//! Network chunks do not respect record boundaries. [`LineBuffer`] holds
//! bytes until a newline arrives, and [`JsonLines`] additionally keeps a line
//! that fails to parse and prefixes it to the next one before retrying.

use memchr::memchr;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Unparseable text kept for retries is discarded past this size.
const MAX_CARRY_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<String> {
        let newline_pos = memchr(b'\n', &self.buffer)?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Take whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Every line is a JSON document.
    Plain,
    /// Only `data:` lines carry JSON; other SSE fields are skipped.
    ServerSentEvents,
}

#[derive(Debug)]
pub struct JsonLines {
    framing: Framing,
    lines: LineBuffer,
    carry: String,
}

impl JsonLines {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            lines: LineBuffer::new(),
            carry: String::new(),
        }
    }

    /// Feed bytes and return every record completed by them, in order.
    pub fn push<T: DeserializeOwned>(&mut self, bytes: &[u8]) -> Vec<T> {
        self.lines.push(bytes);
        let mut records = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if let Some(record) = self.accept(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Flush a final unterminated line once the body has ended.
    pub fn finish<T: DeserializeOwned>(&mut self) -> Option<T> {
        let rest = self.lines.finish()?;
        self.accept(&rest)
    }

    fn accept<T: DeserializeOwned>(&mut self, line: &str) -> Option<T> {
        let payload = match self.framing {
            Framing::Plain => line,
            Framing::ServerSentEvents => extract_data_payload(line)?,
        };
        if payload.trim().is_empty() {
            return None;
        }

        let had_carry = !self.carry.is_empty();
        self.carry.push_str(payload);
        match serde_json::from_str::<T>(&self.carry) {
            Ok(record) => {
                self.carry.clear();
                Some(record)
            }
            Err(err) => {
                if had_carry {
                    if let Ok(record) = serde_json::from_str::<T>(payload) {
                        warn!(
                            dropped = self.carry.len() - payload.len(),
                            "Discarding unparseable stream fragment"
                        );
                        self.carry.clear();
                        return Some(record);
                    }
                }
                if self.carry.len() > MAX_CARRY_BYTES {
                    warn!(dropped = self.carry.len(), "Discarding unparseable stream data");
                    self.carry.clear();
                    return None;
                }
                debug!(error = %err, buffered = self.carry.len(), "Buffering partial record");
                None
            }
        }
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
