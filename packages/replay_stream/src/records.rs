//! Newline-delimited JSON records from a chunked byte source.
//!
//! The pipeline is three stateful stages applied in order to every chunk:
//! UTF-8 decoding ([`Utf8StreamDecoder`]), delimiter splitting
//! ([`LineSplitter`]) and JSON parsing ([`parse_line`]). [`RecordDecoder`]
//! composes them synchronously; [`decode_records`] drives it from an async
//! byte stream.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{SourceError, StreamError};
use crate::lines::LineSplitter;
use crate::utf8::Utf8StreamDecoder;

/// A lazy, finite sequence of parsed records. Ends after the first error.
pub type RecordStream = BoxStream<'static, Result<Value, StreamError>>;

/// Parse one delimited segment.
///
/// Whitespace-only segments yield `Ok(None)`. Anything else must be a
/// complete JSON value.
pub fn parse_line(line: &str, line_no: u64) -> Result<Option<Value>, StreamError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| StreamError::Parse {
            line: line_no,
            source,
        })
}

/// Synchronous decode → split → parse pipeline.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    utf8: Utf8StreamDecoder,
    lines: LineSplitter,
    line_no: u64,
    failed: bool,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes.
    ///
    /// Returns the records completed by this chunk in order. If the chunk
    /// contains a fatal error, the records before it are returned followed by
    /// the error, and every later call returns nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value, StreamError>> {
        if self.failed {
            return Vec::new();
        }

        let text = match self.utf8.decode(chunk) {
            Ok(text) => text,
            Err(e) => {
                self.failed = true;
                return vec![Err(e)];
            }
        };

        let mut out = Vec::new();
        for line in self.lines.push(&text) {
            self.line_no += 1;
            match parse_line(&line, self.line_no) {
                Ok(Some(value)) => out.push(Ok(value)),
                Ok(None) => {}
                Err(e) => {
                    self.failed = true;
                    out.push(Err(e));
                    break;
                }
            }
        }
        out
    }

    /// End of input. An unterminated trailing line is not a record and is
    /// dropped here.
    pub fn finish(&mut self) {
        let incomplete = self.utf8.finish();
        if let Some(tail) = self.lines.finish() {
            warn!(
                line = self.line_no + 1,
                bytes = tail.len() + incomplete,
                "dropping unterminated trailing line"
            );
        } else if incomplete > 0 {
            warn!(bytes = incomplete, "dropping incomplete UTF-8 sequence at end of stream");
        }
    }

    /// Number of delimited lines seen so far, blank ones included.
    pub fn lines_seen(&self) -> u64 {
        self.line_no
    }
}

struct DecodeState<S> {
    source: Pin<Box<S>>,
    decoder: RecordDecoder,
    pending: VecDeque<Result<Value, StreamError>>,
    done: bool,
}

/// Decode a chunked byte stream into a stream of JSON records.
///
/// Chunks may be any size and may split characters, delimiters and records.
/// A source error, an invalid byte or a malformed line ends the stream with
/// that error after every record that preceded it.
pub fn decode_records<S, B, E>(source: S) -> RecordStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<SourceError> + Send + 'static,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: RecordDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.done = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.done {
                return None;
            }

            match st.source.next().await {
                Some(Ok(chunk)) => {
                    let chunk = chunk.as_ref();
                    trace!(bytes = chunk.len(), "received chunk");
                    st.pending.extend(st.decoder.push(chunk));
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(StreamError::Source(e.into())));
                }
                None => {
                    st.decoder.finish();
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}
