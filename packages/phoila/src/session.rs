//! A notebook session: one render stream, decoded once, replayed to every
//! view that asks for it.
//!
//! Construction starts the pipeline immediately. Records flow through
//! [`decode_records`], are classified, and content records are admitted
//! into a [`ReplayBroadcaster`] together with their extracted output areas.
//! The first connection descriptor starts the kernel handoff in the
//! background; its outcome is only visible through
//! [`NotebookSession::connected`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use replay_stream::{
    Completion, RecordStream, ReplayBroadcaster, ReplayStream, SourceError, StreamError,
    decode_records, wait_for_completion,
};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clones::ClonedOutput;
use crate::config::StreamConfig;
use crate::error::{ConnectError, SessionError};
use crate::extract::extract_output_areas;
use crate::kernel::KernelConnector;
use crate::outputs::OutputArea;
use crate::record::{ContentEntry, ContentRecord, Record};
use crate::render::RenderSink;
use crate::source::NotebookSource;
use crate::widgets::{WidgetManager, WidgetRegistry};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct SessionContext {
    pub source: Arc<dyn NotebookSource>,
    pub connector: Arc<dyn KernelConnector>,
    pub registry: WidgetRegistry,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { kernel_id: String },
    Populated { ok: bool },
    CloneRemoved { clone_id: String },
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Records are still arriving.
    Streaming,
    /// The stream ended, cleanly or not.
    Populated,
    Disposed,
}

type Connected = Option<Result<WidgetManager, ConnectError>>;

/// Per-record work done on the pump task.
struct RecordHandler {
    notebook_path: String,
    output_mime_type: String,
    outputs: RwLock<Vec<Arc<[OutputArea]>>>,
    handoff_started: AtomicBool,
    connected: watch::Sender<Connected>,
    connector: Arc<dyn KernelConnector>,
    registry: WidgetRegistry,
    events: broadcast::Sender<SessionEvent>,
    /// Cancelled when the session is disposed.
    shutdown: CancellationToken,
}

impl RecordHandler {
    fn handle(
        self: &Arc<Self>,
        item: Result<Value, StreamError>,
    ) -> Option<Result<ContentEntry, StreamError>> {
        let value = match item {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };

        match Record::classify(value) {
            Record::Connection { kernel_id } => {
                self.begin_handoff(kernel_id);
                None
            }
            Record::Content(record) => self.admit(record).map(Ok),
            Record::Ignored(value) => {
                debug!(path = %self.notebook_path, record = %value, "ignoring unrecognized record");
                None
            }
        }
    }

    fn admit(&self, record: ContentRecord) -> Option<ContentEntry> {
        let areas = match extract_output_areas(&record.source, &self.output_mime_type) {
            Ok(areas) => areas,
            Err(e) => {
                warn!(path = %self.notebook_path, error = %e, "skipping content record with malformed outputs");
                return None;
            }
        };
        let outputs: Arc<[OutputArea]> = areas.into();

        let mut lists = self.outputs.write();
        if self.shutdown.is_cancelled() {
            return None;
        }
        let index = lists.len();
        lists.push(outputs.clone());
        Some(ContentEntry {
            index,
            record: Arc::new(record),
            outputs,
        })
    }

    fn begin_handoff(self: &Arc<Self>, kernel_id: String) {
        if self.handoff_started.swap(true, Ordering::SeqCst) {
            debug!(path = %self.notebook_path, %kernel_id, "ignoring additional kernel descriptor");
            return;
        }

        let handler = self.clone();
        tokio::spawn(async move {
            info!(path = %handler.notebook_path, %kernel_id, "connecting to kernel");
            let result = handler
                .connector
                .connect(&kernel_id)
                .await
                .map(|kernel| WidgetManager::new(kernel, &handler.registry));

            match &result {
                Ok(_) => {
                    if !handler.shutdown.is_cancelled() {
                        let _ = handler.events.send(SessionEvent::Connected {
                            kernel_id: kernel_id.clone(),
                        });
                    }
                }
                Err(e) => warn!(path = %handler.notebook_path, %kernel_id, error = %e, "kernel handoff failed"),
            }
            handler.connected.send_replace(Some(result));
        });
    }
}

pub(crate) struct SessionInner {
    notebook_path: String,
    handler: Arc<RecordHandler>,
    entries: Mutex<Option<ReplayBroadcaster<ContentEntry>>>,
    populated: watch::Receiver<Option<Completion>>,
    clones: Mutex<HashMap<String, ClonedOutput>>,
    disposed: AtomicBool,
}

impl SessionInner {
    /// Drop a clone from the tracked set, announcing it if it was there.
    pub(crate) fn forget_clone(&self, clone_id: &str) {
        if self.clones.lock().remove(clone_id).is_some() {
            debug!(path = %self.notebook_path, clone_id, "clone removed");
            let _ = self.handler.events.send(SessionEvent::CloneRemoved {
                clone_id: clone_id.to_string(),
            });
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Last handle gone: stop reading the source
        if let Some(entries) = self.entries.get_mut().take() {
            entries.dispose();
        }
    }
}

#[derive(Clone)]
pub struct NotebookSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for NotebookSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookSession")
            .field("notebook_path", &self.inner.notebook_path)
            .field("state", &self.state())
            .finish()
    }
}

impl NotebookSession {
    /// Open `notebook_path` through the context's source and start decoding.
    /// Must be called within a Tokio runtime.
    ///
    /// A source that fails to open surfaces through [`Self::populated`].
    pub fn new(notebook_path: impl Into<String>, ctx: &SessionContext) -> Self {
        let notebook_path = notebook_path.into();
        let source = ctx.source.clone();
        let path = notebook_path.clone();

        let bytes = stream::once(async move { source.open(&path).await }).flat_map(|opened| {
            match opened {
                Ok(bytes) => bytes,
                Err(e) => stream::iter([Err(SourceError::from(e))]).boxed(),
            }
        });

        Self::from_records(notebook_path, decode_records(bytes), ctx)
    }

    /// Start a session over an already-decoded record stream.
    pub fn from_records(
        notebook_path: impl Into<String>,
        records: RecordStream,
        ctx: &SessionContext,
    ) -> Self {
        let notebook_path = notebook_path.into();
        let (connected, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let handler = Arc::new(RecordHandler {
            notebook_path: notebook_path.clone(),
            output_mime_type: ctx.stream.output_mime_type.clone(),
            outputs: RwLock::new(Vec::new()),
            handoff_started: AtomicBool::new(false),
            connected,
            connector: ctx.connector.clone(),
            registry: ctx.registry.clone(),
            events: events.clone(),
            shutdown: CancellationToken::new(),
        });

        let pump_handler = handler.clone();
        let entries =
            ReplayBroadcaster::new(records.filter_map(move |item| future::ready(pump_handler.handle(item))));
        let populated = entries.completion();

        let done = entries.finished();
        let path = notebook_path.clone();
        tokio::spawn(async move {
            let outcome = done.await;
            match &outcome {
                Ok(()) => info!(%path, "session populated"),
                Err(e) if e.is_cancelled() => return,
                Err(e) => error!(%path, error = %e, "render stream failed"),
            }
            let _ = events.send(SessionEvent::Populated {
                ok: outcome.is_ok(),
            });
        });

        Self {
            inner: Arc::new(SessionInner {
                notebook_path,
                handler,
                entries: Mutex::new(Some(entries)),
                populated,
                clones: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn notebook_path(&self) -> &str {
        &self.inner.notebook_path
    }

    /// Every admitted content entry, past and future, in stream order. Ends
    /// when the stream ends or the session is disposed.
    pub fn entries(&self) -> ReplayStream<ContentEntry> {
        match self.inner.entries.lock().as_ref() {
            Some(entries) => entries.attach(),
            None => ReplayStream::default(),
        }
    }

    /// Resolves once the kernel handoff completes. Stays pending if the
    /// stream never names a kernel.
    pub fn connected(
        &self,
    ) -> impl Future<Output = Result<WidgetManager, ConnectError>> + Send + 'static {
        let mut rx = self.inner.handler.connected.subscribe();
        async move {
            let result = match rx.wait_for(Option::is_some).await {
                Ok(value) => (*value).clone(),
                Err(_) => None,
            };
            match result {
                Some(result) => result,
                None => future::pending().await,
            }
        }
    }

    /// The handoff outcome, if it has completed.
    pub fn try_connected(&self) -> Option<Result<WidgetManager, ConnectError>> {
        self.inner.handler.connected.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.handler.connected.borrow(), Some(Ok(_)))
    }

    /// Resolves when the stream ends. Fails with the stream's error, or with
    /// [`SessionError::Disposed`] if the session was disposed first.
    pub fn populated(&self) -> impl Future<Output = Result<(), SessionError>> + Send + 'static {
        let rx = self.inner.populated.clone();
        async move { wait_for_completion(rx).await.map_err(SessionError::from) }
    }

    pub fn state(&self) -> SessionState {
        if self.is_disposed() {
            SessionState::Disposed
        } else if self.inner.populated.borrow().is_some() {
            SessionState::Populated
        } else {
            SessionState::Streaming
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.handler.events.subscribe()
    }

    /// Output lists admitted so far, one per content entry.
    pub fn outputs(&self) -> Vec<Arc<[OutputArea]>> {
        self.inner.handler.outputs.read().clone()
    }

    pub fn output_list(&self, index: usize) -> Option<Arc<[OutputArea]>> {
        self.inner.handler.outputs.read().get(index).cloned()
    }

    /// A view mirroring the outputs of content entry `index`.
    ///
    /// `index` counts content entries, so a cell without outputs still takes
    /// a slot. It is not a position in the flattened list of output areas.
    ///
    /// The clone becomes ready once that entry is admitted, and disposes
    /// itself if the stream ends without it.
    pub fn clone_output(&self, index: usize) -> ClonedOutput {
        let clone = ClonedOutput::new(self, index);
        {
            let mut clones = self.inner.clones.lock();
            if self.is_disposed() {
                drop(clones);
                clone.dispose();
                return clone;
            }
            clones.insert(clone.id().to_string(), clone.clone());
        }
        debug!(path = %self.inner.notebook_path, clone_id = clone.id(), index, "output cloned");
        // Tracked before it can resolve, so a self-disposal is always announced
        clone.follow(self.entries());
        clone
    }

    pub fn clone_count(&self) -> usize {
        self.inner.clones.lock().len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Tear the session down. Idempotent.
    ///
    /// Stops the pump, ends every attached consumer, disposes every clone,
    /// and releases the admitted outputs.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.handler.shutdown.cancel();

        if let Some(entries) = inner.entries.lock().take() {
            entries.dispose();
        }

        let clones: Vec<ClonedOutput> = inner.clones.lock().values().cloned().collect();
        for clone in clones {
            clone.dispose();
        }
        inner.clones.lock().clear();
        inner.handler.outputs.write().clear();

        info!(path = %inner.notebook_path, "session disposed");
        let _ = inner.handler.events.send(SessionEvent::Disposed);
    }

    /// Feed every entry to `sink` as it arrives, binding the widget manager
    /// when the handoff succeeds. Returns how the stream ended.
    ///
    /// If the stream named a kernel, this waits for the handoff to finish
    /// before returning, unless the session is disposed first.
    pub async fn render_into<R>(&self, sink: &mut R) -> Result<(), SessionError>
    where
        R: RenderSink + ?Sized,
    {
        let mut entries = self.entries();
        let connected = self.connected();
        tokio::pin!(connected);
        let mut bound = false;

        loop {
            tokio::select! {
                entry = entries.next() => match entry {
                    Some(entry) => sink.render_entry(&entry),
                    None => break,
                },
                result = &mut connected, if !bound => {
                    bound = true;
                    match result {
                        Ok(manager) => sink.bind_manager(&manager),
                        Err(e) => debug!(error = %e, "rendering without widgets"),
                    }
                }
            }
        }

        if !bound && self.inner.handler.handoff_started.load(Ordering::SeqCst) {
            tokio::select! {
                result = &mut connected => match result {
                    Ok(manager) => sink.bind_manager(&manager),
                    Err(e) => debug!(error = %e, "rendering without widgets"),
                },
                _ = self.inner.handler.shutdown.cancelled() => {
                    debug!(path = %self.inner.notebook_path, "disposed before the kernel handoff finished");
                }
            }
        }

        let result = self.populated().await;
        if let Err(e) = &result {
            sink.render_failure(e);
        }
        result
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }
}
