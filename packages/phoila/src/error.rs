use std::sync::Arc;

use replay_stream::StreamError;

/// A content record whose embedded output blocks could not be read.
///
/// Recovered per record: the record is skipped and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("output block {index} is not valid JSON: {source}")]
    InvalidJson {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("output block {index} has no outputs array")]
    MissingOutputs { index: usize },

    #[error("output block {index} has malformed outputs: {source}")]
    InvalidOutputs {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// The kernel handoff failed. Only the session's "connected" signal sees this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("kernel {kernel_id} not found")]
    NotFound { kernel_id: String },

    #[error("kernel lookup failed: {0}")]
    Request(String),

    #[error("kernel connections are disabled")]
    Disabled,
}

/// Opening the render stream failed before any bytes were decoded.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{status} ({reason})")]
    Status { status: u16, reason: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a session never finished populating.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("render stream failed: {0}")]
    Stream(Arc<StreamError>),

    #[error("session disposed")]
    Disposed,
}

impl From<Arc<StreamError>> for SessionError {
    fn from(err: Arc<StreamError>) -> Self {
        if err.is_cancelled() {
            SessionError::Disposed
        } else {
            SessionError::Stream(err)
        }
    }
}
