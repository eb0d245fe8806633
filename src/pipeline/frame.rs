//! Line frame decoder.
//!
//! Splits a byte stream on `\n` (a preceding `\r` is stripped as well).
//! Partial lines stay in the buffer until the rest arrives. A line longer
//! than `max_length`, or `max_length` bytes with no delimiter in sight,
//! fails the decode.

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// Decode result.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult {
    /// One complete line, delimiter removed.
    Frame(BytesMut),
    /// No delimiter yet; the partial line stays buffered.
    NeedData,
    /// Input exceeded the maximum frame length.
    TooLong(ProtocolError),
}

/// Decode one line from the front of `buffer`.
///
/// On `Frame`, the line and its delimiter are removed from the buffer. On
/// `TooLong` the buffer is left untouched; the connection is expected to
/// close.
pub fn decode(buffer: &mut BytesMut, max_length: usize) -> DecodeResult {
    match find_newline(buffer) {
        Some(pos) => {
            let length = if pos > 0 && buffer[pos - 1] == b'\r' {
                pos - 1
            } else {
                pos
            };

            if length > max_length {
                return DecodeResult::TooLong(ProtocolError::FrameTooLong {
                    length,
                    max: max_length,
                });
            }

            let mut line = buffer.split_to(pos + 1);
            line.truncate(length);
            DecodeResult::Frame(line)
        }
        None if buffer.len() > max_length => DecodeResult::TooLong(ProtocolError::FrameTooLong {
            length: buffer.len(),
            max: max_length,
        }),
        None => DecodeResult::NeedData,
    }
}

/// Incremental decoder that owns the partial-line buffer for one connection.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_length: usize,
}

impl LineDecoder {
    pub fn new(max_length: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_length,
        }
    }

    /// Bytes held back waiting for a delimiter.
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `chunk` and drain every complete line into `out`.
    ///
    /// Lines decoded before a failure are still delivered.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<BytesMut>) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(chunk);

        loop {
            match decode(&mut self.buffer, self.max_length) {
                DecodeResult::Frame(line) => out.push(line),
                DecodeResult::NeedData => return Ok(()),
                DecodeResult::TooLong(err) => {
                    self.buffer.advance(self.buffer.len());
                    return Err(err);
                }
            }
        }
    }
}

fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}
