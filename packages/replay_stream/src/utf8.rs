//! Streaming UTF-8 decoding.
//!
//! Bytes arrive in chunks of arbitrary size, so a multi-byte character may be
//! split across two (or more) chunks. The decoder holds the incomplete tail
//! until the continuation arrives instead of decoding each chunk on its own.

use crate::error::StreamError;

/// Streaming UTF-8 decoder that buffers incomplete multi-byte sequences
/// across chunk boundaries.
///
/// Unlike a lossy decoder, genuinely invalid bytes are an error: the wire
/// format is UTF-8 JSON and anything else means the stream is corrupt.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    buf: Vec<u8>,
    /// Bytes consumed (decoded or rejected) before `buf`.
    consumed: u64,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return the longest valid UTF-8 prefix.
    /// Any trailing incomplete multi-byte sequence is retained for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, StreamError> {
        self.buf.extend_from_slice(chunk);

        let valid_up_to = match std::str::from_utf8(&self.buf) {
            Ok(_) => self.buf.len(),
            Err(e) => match e.error_len() {
                // Incomplete sequence at end: keep it for the next call
                None => e.valid_up_to(),
                Some(_) => {
                    return Err(StreamError::Decode {
                        offset: self.consumed + e.valid_up_to() as u64,
                    });
                }
            },
        };

        let tail = self.buf.split_off(valid_up_to);
        let head = std::mem::replace(&mut self.buf, tail);
        self.consumed += head.len() as u64;

        // `head` was validated above
        String::from_utf8(head).map_err(|e| StreamError::Decode {
            offset: self.consumed + e.utf8_error().valid_up_to() as u64,
        })
    }

    /// Number of bytes held back waiting for a continuation.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Signal end of input, returning how many incomplete bytes were discarded.
    ///
    /// An incomplete sequence can only follow the last newline, so it always
    /// belongs to an unterminated trailing line, which is dropped anyway.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buf.len();
        self.consumed += dropped as u64;
        self.buf.clear();
        dropped
    }
}
