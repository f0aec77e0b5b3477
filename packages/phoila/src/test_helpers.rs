//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use replay_stream::SourceError;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::config::StreamConfig;
use crate::error::{ConnectError, RequestError, SessionError};
use crate::extract::DEFAULT_OUTPUT_MIME_TYPE;
use crate::kernel::{KernelConnection, KernelConnector};
use crate::record::ContentEntry;
use crate::render::RenderSink;
use crate::session::SessionContext;
use crate::source::{ByteStream, NotebookSource};
use crate::widgets::{WidgetManager, WidgetRegistry};

pub fn kernel_connection(id: &str) -> KernelConnection {
    KernelConnection {
        id: id.to_string(),
        name: "python3".to_string(),
        execution_state: Some("idle".to_string()),
        channels_url: format!("ws://localhost:8888/api/kernels/{id}/channels"),
    }
}

/// One NDJSON content line carrying `html` as its source.
pub fn content_line(html: &str) -> String {
    format!("{}\n", json!({ "source": html }))
}

/// An output block script wrapping `outputs` (raw JSON text).
pub fn output_script(outputs: &str) -> String {
    format!(r#"<div><script type="{DEFAULT_OUTPUT_MIME_TYPE}">{{"outputs": {outputs}}}</script></div>"#)
}

pub fn stream_output(text: &str) -> String {
    json!({ "output_type": "stream", "name": "stdout", "text": text }).to_string()
}

pub fn context(source: ScriptedSource, connector: ScriptedConnector) -> SessionContext {
    SessionContext {
        source: Arc::new(source),
        connector: Arc::new(connector),
        registry: WidgetRegistry::new(),
        stream: StreamConfig::default(),
    }
}

enum Script {
    Chunks(Vec<Bytes>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes, SourceError>>),
    Status(u16),
}

/// Serves canned byte streams by notebook path. Unknown paths are a 404.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(self, path: &str, chunks: &[&str]) -> Self {
        let chunks = chunks.iter().map(|c| Bytes::from(c.to_string())).collect();
        self.scripts.lock().insert(path.to_string(), Script::Chunks(chunks));
        self
    }

    pub fn failing(self, path: &str, status: u16) -> Self {
        self.scripts.lock().insert(path.to_string(), Script::Status(status));
        self
    }

    /// A stream fed by hand. Opening it a second time is a 404.
    pub fn channel(&self, path: &str) -> mpsc::UnboundedSender<Result<Bytes, SourceError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().insert(path.to_string(), Script::Channel(rx));
        tx
    }
}

fn not_found(status: u16) -> RequestError {
    RequestError::Status {
        status,
        reason: reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string(),
    }
}

#[async_trait]
impl NotebookSource for ScriptedSource {
    async fn open(&self, notebook_path: &str) -> Result<ByteStream, RequestError> {
        let mut scripts = self.scripts.lock();
        match scripts.remove(notebook_path) {
            Some(Script::Chunks(chunks)) => {
                scripts.insert(notebook_path.to_string(), Script::Chunks(chunks.clone()));
                Ok(stream::iter(chunks.into_iter().map(Ok::<Bytes, SourceError>)).boxed())
            }
            Some(Script::Channel(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })
            .boxed()),
            Some(Script::Status(status)) => {
                scripts.insert(notebook_path.to_string(), Script::Status(status));
                Err(not_found(status))
            }
            None => Err(not_found(404)),
        }
    }
}

#[derive(Default)]
struct ConnectorInner {
    kernels: Mutex<HashMap<String, KernelConnection>>,
    calls: AtomicUsize,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Knows a fixed set of kernels and counts lookups.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<ConnectorInner>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the next lookup until the returned sender fires. Dropping the
    /// sender keeps it held for good.
    pub fn gate(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.inner.gate.lock() = Some(rx);
        tx
    }

    pub fn with_kernel(self, id: &str) -> Self {
        self.inner
            .kernels
            .lock()
            .insert(id.to_string(), kernel_connection(id));
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KernelConnector for ScriptedConnector {
    async fn connect(&self, kernel_id: &str) -> Result<KernelConnection, ConnectError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.inner.gate.lock().take();
        match gate {
            Some(gate) => {
                if gate.await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => tokio::task::yield_now().await,
        }
        self.inner
            .kernels
            .lock()
            .get(kernel_id)
            .cloned()
            .ok_or_else(|| ConnectError::NotFound {
                kernel_id: kernel_id.to_string(),
            })
    }
}

/// Records what a session rendered.
#[derive(Default)]
pub struct RecordingSink {
    pub entries: Vec<usize>,
    pub kernels: Vec<String>,
    pub failures: Vec<String>,
}

impl RenderSink for RecordingSink {
    fn render_entry(&mut self, entry: &ContentEntry) {
        self.entries.push(entry.index);
    }

    fn bind_manager(&mut self, manager: &WidgetManager) {
        self.kernels.push(manager.kernel().id.clone());
    }

    fn render_failure(&mut self, error: &SessionError) {
        self.failures.push(error.to_string());
    }
}
