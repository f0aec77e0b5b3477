use std::sync::{Arc, Weak};

use futures::StreamExt;
use replay_stream::ReplayStream;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::outputs::OutputArea;
use crate::record::ContentEntry;
use crate::session::{NotebookSession, SessionInner};
use crate::sessions::CloneDescriptor;

pub const CLONE_ID_PREFIX: &str = "LinkedOutputView";

#[derive(Debug, Clone, PartialEq)]
pub enum CloneState {
    Pending,
    Ready(Arc<[OutputArea]>),
    Disposed,
}

#[derive(Debug)]
struct CloneInner {
    id: String,
    index: usize,
    notebook_path: String,
    session: Weak<SessionInner>,
    state: watch::Sender<CloneState>,
}

/// A secondary view of one content entry's outputs.
///
/// Holds only a weak reference to its session, which tracks it until either
/// side is disposed.
#[derive(Debug, Clone)]
pub struct ClonedOutput {
    inner: Arc<CloneInner>,
}

impl ClonedOutput {
    /// A pending clone. Nothing resolves it until [`Self::follow`] is called.
    pub(crate) fn new(session: &NotebookSession, index: usize) -> Self {
        let (state, _) = watch::channel(CloneState::Pending);
        Self {
            inner: Arc::new(CloneInner {
                id: format!("{CLONE_ID_PREFIX}-{}", Uuid::new_v4()),
                index,
                notebook_path: session.notebook_path().to_string(),
                session: session.downgrade(),
                state,
            }),
        }
    }

    /// Watch `entries` for this clone's index. Resolves on a match and
    /// disposes the clone if the stream ends without one. The session must
    /// already be tracking the clone.
    pub(crate) fn follow(&self, mut entries: ReplayStream<ContentEntry>) {
        let index = self.inner.index;
        let resolver = self.clone();
        tokio::spawn(async move {
            let found = loop {
                match entries.next().await {
                    Some(entry) if entry.index == index => break Some(entry.outputs),
                    Some(_) => continue,
                    None => break None,
                }
            };
            match found {
                Some(outputs) => resolver.resolve(outputs),
                None => {
                    debug!(
                        path = %resolver.inner.notebook_path,
                        index,
                        "cloned output never arrived, disposing"
                    );
                    resolver.dispose();
                }
            }
        });
    }

    fn resolve(&self, outputs: Arc<[OutputArea]>) {
        self.inner.state.send_if_modified(|state| {
            if matches!(state, CloneState::Pending) {
                *state = CloneState::Ready(outputs);
                true
            } else {
                false
            }
        });
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn notebook_path(&self) -> &str {
        &self.inner.notebook_path
    }

    pub fn title(&self) -> &'static str {
        "Output View"
    }

    pub fn caption(&self) -> String {
        format!("For Notebook: {}", self.inner.notebook_path)
    }

    pub fn descriptor(&self) -> CloneDescriptor {
        CloneDescriptor {
            notebook_path: self.inner.notebook_path.clone(),
            index: self.inner.index,
        }
    }

    pub fn state(&self) -> CloneState {
        self.inner.state.borrow().clone()
    }

    pub fn outputs(&self) -> Option<Arc<[OutputArea]>> {
        match &*self.inner.state.borrow() {
            CloneState::Ready(outputs) => Some(outputs.clone()),
            _ => None,
        }
    }

    /// Resolves with the outputs once available, or `None` if the clone is
    /// disposed first.
    pub fn ready(&self) -> impl Future<Output = Option<Arc<[OutputArea]>>> + Send + 'static {
        let mut rx = self.inner.state.subscribe();
        async move {
            let state = match rx
                .wait_for(|state| !matches!(state, CloneState::Pending))
                .await
            {
                Ok(state) => (*state).clone(),
                Err(_) => CloneState::Disposed,
            };
            match state {
                CloneState::Ready(outputs) => Some(outputs),
                _ => None,
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.inner.state.borrow(), CloneState::Disposed)
    }

    /// Idempotent. The owning session stops tracking the clone and announces
    /// its removal.
    pub fn dispose(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if matches!(state, CloneState::Disposed) {
                false
            } else {
                *state = CloneState::Disposed;
                true
            }
        });
        if changed {
            if let Some(session) = self.inner.session.upgrade() {
                session.forget_clone(&self.inner.id);
            }
        }
    }
}
