//! Decoder for the `application/vnd.amazon.eventstream` framing.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! [total len u32][headers len u32][prelude crc u32][headers][payload][message crc u32]
//! ```

use thiserror::Error;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + TRAILER_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("prelude checksum mismatch")]
    PreludeChecksum,
    #[error("message checksum mismatch")]
    MessageChecksum,
    #[error("invalid frame length {0}")]
    Length(usize),
    #[error("malformed header block: {0}")]
    Header(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| match value {
            HeaderValue::String(s) if key == name => Some(s.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;
        let prelude_crc = read_u32(&self.buffer[8..12]);

        if crc32fast::hash(&self.buffer[0..8]) != prelude_crc {
            return Err(FrameError::PreludeChecksum);
        }
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len)
            || headers_len > total_len - MIN_FRAME_LEN
        {
            return Err(FrameError::Length(total_len));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
        let message_crc = read_u32(&frame[total_len - TRAILER_LEN..]);
        if crc32fast::hash(&frame[..total_len - TRAILER_LEN]) != message_crc {
            return Err(FrameError::MessageChecksum);
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total_len - TRAILER_LEN].to_vec();
        Ok(Some(Frame { headers, payload }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| FrameError::Header(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn parse_headers(bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>, FrameError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let mut headers = Vec::new();
    while !cursor.is_empty() {
        let name_len = cursor.take(1)?[0] as usize;
        let name = String::from_utf8(cursor.take(name_len)?.to_vec())
            .map_err(|_| FrameError::Header("header name is not UTF-8".to_string()))?;
        let value = match cursor.take(1)?[0] {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(i8::from_be_bytes(cursor.take_array()?)),
            3 => HeaderValue::Short(i16::from_be_bytes(cursor.take_array()?)),
            4 => HeaderValue::Int(i32::from_be_bytes(cursor.take_array()?)),
            5 => HeaderValue::Long(i64::from_be_bytes(cursor.take_array()?)),
            6 => {
                let len = u16::from_be_bytes(cursor.take_array()?) as usize;
                HeaderValue::Bytes(cursor.take(len)?.to_vec())
            }
            7 => {
                let len = u16::from_be_bytes(cursor.take_array()?) as usize;
                let raw = cursor.take(len)?.to_vec();
                HeaderValue::String(String::from_utf8(raw).map_err(|_| {
                    FrameError::Header(format!("value of '{name}' is not UTF-8"))
                })?)
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(cursor.take_array()?)),
            9 => HeaderValue::Uuid(cursor.take_array()?),
            other => return Err(FrameError::Header(format!("unknown value type {other}"))),
        };
        headers.push((name, value));
    }
    Ok(headers)
}

/// Encode a frame with string headers. Used to build fixtures.
#[cfg(test)]
pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total_len = (PRELUDE_LEN + header_bytes.len() + payload.len() + TRAILER_LEN) as u32;
    let mut frame = Vec::with_capacity(total_len as usize);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_frame() -> Vec<u8> {
        encode_frame(
            &[
                (":message-type", "event"),
                (":event-type", "chunk"),
                (":content-type", "application/json"),
            ],
            br#"{"bytes":"eyJnZW5lcmF0aW9uIjoiSGkifQ=="}"#,
        )
    }

    #[test]
    fn decodes_frames_delivered_byte_by_byte() {
        let bytes = chunk_frame();
        let mut decoder = FrameDecoder::new();
        for (i, byte) in bytes.iter().enumerate() {
            decoder.push(&[*byte]);
            let frame = decoder.next_frame().unwrap();
            if i + 1 < bytes.len() {
                assert!(frame.is_none());
            } else {
                let frame = frame.unwrap();
                assert_eq!(frame.header_str(":event-type"), Some("chunk"));
                assert_eq!(frame.header_str(":missing"), None);
                assert!(frame.payload.starts_with(b"{\"bytes\""));
            }
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut bytes = chunk_frame();
        bytes.extend(encode_frame(&[(":message-type", "event")], b""));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert!(decoder.next_frame().unwrap().is_some());
        let second = decoder.next_frame().unwrap().unwrap();
        assert!(second.payload.is_empty());
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut bytes = chunk_frame();
        let last_payload_byte = bytes.len() - 5;
        bytes[last_payload_byte] ^= 0xff;
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Err(FrameError::MessageChecksum));
    }

    #[test]
    fn rejects_corrupted_prelude() {
        let mut bytes = chunk_frame();
        bytes[1] ^= 0x01;
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Err(FrameError::PreludeChecksum));
    }

    #[test]
    fn parses_non_string_header_types() {
        let mut block = Vec::new();
        block.push(4u8);
        block.extend_from_slice(b"flag");
        block.push(0);
        block.push(3u8);
        block.extend_from_slice(b"num");
        block.push(4);
        block.extend_from_slice(&42i32.to_be_bytes());

        let headers = parse_headers(&block).unwrap();
        assert_eq!(
            headers,
            vec![
                ("flag".to_string(), HeaderValue::Bool(true)),
                ("num".to_string(), HeaderValue::Int(42)),
            ]
        );
        assert!(parse_headers(&[3, b'a']).is_err());
    }
}
