//! Phoila - progressive notebook rendering over a replayable record stream
//!
//! A notebook server renders a notebook as newline-delimited JSON: an
//! optional kernel descriptor followed by one record per rendered cell, each
//! embedding its outputs as script blocks. A [`NotebookSession`] decodes that
//! stream once and replays it to any number of views, hands the kernel off
//! to a [`WidgetManager`], and lets secondary views mirror a single cell's
//! outputs through [`ClonedOutput`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use phoila::{
//!     HttpKernelConnector, HttpNotebookSource, NotebookSession, ServerConfig, ServerFileConfig,
//!     SessionContext, StreamConfig, TerminalRenderer, WidgetRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ServerConfig::from_file(&ServerFileConfig::default())?;
//!     let client = server.build_client()?;
//!     let ctx = SessionContext {
//!         source: Arc::new(HttpNotebookSource::new(client.clone(), server.clone())),
//!         connector: Arc::new(HttpKernelConnector::new(client, server)),
//!         registry: WidgetRegistry::new(),
//!         stream: StreamConfig::default(),
//!     };
//!
//!     let session = NotebookSession::new("analysis.ipynb", &ctx);
//!     let mut renderer = TerminalRenderer::new(std::io::stdout());
//!     session.render_into(&mut renderer).await?;
//!
//!     let view = session.clone_output(0);
//!     if let Some(outputs) = view.ready().await {
//!         println!("cell 0 has {} output areas", outputs.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod clones;
pub mod config;
mod error;
pub mod extract;
pub mod kernel;
pub mod outputs;
pub mod record;
pub mod render;
pub mod session;
pub mod sessions;
pub mod source;
pub mod widgets;

#[cfg(test)]
mod test_helpers;

pub use clones::{CloneState, ClonedOutput};
pub use config::{
    FileConfig, PhoilaDirs, ServerConfig, ServerFileConfig, StreamConfig, StreamFileConfig,
    load_config,
};
pub use error::{ConnectError, ExtractError, RequestError, SessionError};
pub use extract::{DEFAULT_OUTPUT_MIME_TYPE, extract_output_areas};
pub use kernel::{HttpKernelConnector, KernelConnection, KernelConnector, NoKernel};
pub use outputs::{Output, OutputArea};
pub use record::{ContentEntry, ContentRecord, Record};
pub use render::{RenderSink, TerminalRenderer};
pub use session::{NotebookSession, SessionContext, SessionEvent, SessionState};
pub use sessions::{CloneDescriptor, SessionRegistry};
pub use source::{FileNotebookSource, HttpNotebookSource, NotebookSource, request_render};
pub use widgets::{WIDGET_VIEW_MIME_TYPE, WidgetManager, WidgetModule, WidgetRegistry};
