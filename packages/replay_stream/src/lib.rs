//! Replay Stream - incremental NDJSON decoding and replayable multicast
//!
//! This crate turns a chunked byte stream carrying newline-delimited JSON into
//! a stream of records, and lets any number of consumers observe one such
//! stream without driving it more than once. It has no HTTP dependencies and
//! no knowledge of what the records mean.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use replay_stream::{ReplayBroadcaster, decode_records};
//!
//! #[tokio::main]
//! async fn main() {
//!     let chunks = futures::stream::iter(vec![
//!         Ok::<_, std::io::Error>(b"{\"kernelId\":\"k1\"}\n{\"sou".to_vec()),
//!         Ok(b"rce\":\"<div></div>\"}\n".to_vec()),
//!     ]);
//!
//!     let records = ReplayBroadcaster::new(decode_records(chunks));
//!
//!     // Attach at any time: history first, then the live tail
//!     let mut first = records.attach();
//!     while let Some(record) = first.next().await {
//!         println!("{}", record);
//!     }
//!
//!     if let Err(e) = records.finished().await {
//!         eprintln!("stream failed: {}", e);
//!     }
//!     assert_eq!(records.attach().count().await, 2);
//! }
//! ```

mod error;
pub mod lines;
pub mod records;
pub mod replay;
pub mod utf8;

pub use error::{SourceError, StreamError};
pub use lines::LineSplitter;
pub use records::{RecordDecoder, RecordStream, decode_records, parse_line};
pub use replay::{Completion, ReplayBroadcaster, ReplayStream, wait_for_completion};
pub use utf8::Utf8StreamDecoder;
