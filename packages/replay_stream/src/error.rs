/// Boxed error produced by an upstream byte source.
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that terminate a record stream.
///
/// Every variant is fatal: once a stream yields one of these it yields nothing
/// further.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The byte source contained bytes that are not valid UTF-8
    #[error("invalid UTF-8 at byte offset {offset}")]
    Decode { offset: u64 },

    /// A non-blank line was not a valid JSON value
    #[error("malformed record on line {line}: {source}")]
    Parse {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    /// The byte source itself failed
    #[error("byte source failed: {0}")]
    Source(#[source] SourceError),

    /// The stream was stopped before the upstream finished
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Whether this error came from cancellation rather than bad input.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}
