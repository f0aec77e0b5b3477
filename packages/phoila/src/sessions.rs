//! Process-wide session bookkeeping: one live session per notebook path.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clones::ClonedOutput;
use crate::session::{NotebookSession, SessionContext};

/// Enough to recreate a cloned output view after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloneDescriptor {
    pub notebook_path: String,
    pub index: usize,
}

impl CloneDescriptor {
    /// Restorer key, `"<path>:<index>"`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.notebook_path, self.index)
    }

    /// Inverse of [`CloneDescriptor::name`]. The index is taken after the last
    /// `:` so paths may contain colons.
    pub fn parse(name: &str) -> Option<Self> {
        let (path, index) = name.rsplit_once(':')?;
        if path.is_empty() {
            return None;
        }
        Some(Self {
            notebook_path: path.to_string(),
            index: index.parse().ok()?,
        })
    }
}

pub struct SessionRegistry {
    context: SessionContext,
    sessions: Mutex<HashMap<String, NotebookSession>>,
}

impl SessionRegistry {
    pub fn new(context: SessionContext) -> Self {
        Self {
            context,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The live session for `notebook_path`, starting one if there is none.
    pub fn open(&self, notebook_path: &str) -> NotebookSession {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(notebook_path) {
            if !session.is_disposed() {
                return session.clone();
            }
        }
        debug!(path = notebook_path, "starting session");
        let session = NotebookSession::new(notebook_path, &self.context);
        sessions.insert(notebook_path.to_string(), session.clone());
        session
    }

    pub fn get(&self, notebook_path: &str) -> Option<NotebookSession> {
        self.sessions
            .lock()
            .get(notebook_path)
            .filter(|s| !s.is_disposed())
            .cloned()
    }

    pub fn clone_output(&self, notebook_path: &str, index: usize) -> ClonedOutput {
        self.open(notebook_path).clone_output(index)
    }

    pub fn restore(&self, descriptor: &CloneDescriptor) -> ClonedOutput {
        self.clone_output(&descriptor.notebook_path, descriptor.index)
    }

    /// Dispose and forget the session for `notebook_path`.
    pub fn close(&self, notebook_path: &str) -> bool {
        let removed = self.sessions.lock().remove(notebook_path);
        match removed {
            Some(session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }

    /// Paths of sessions that are still live. Disposed ones are pruned.
    pub fn paths(&self) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| !s.is_disposed());
        let mut paths: Vec<String> = sessions.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn dispose_all(&self) {
        let sessions: Vec<NotebookSession> =
            self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        ScriptedConnector, ScriptedSource, content_line, context, output_script, stream_output,
    };

    fn registry() -> SessionRegistry {
        let cell = content_line(&output_script(&format!("[{}]", stream_output("x"))));
        let source = ScriptedSource::new()
            .chunks("a.ipynb", &[&cell])
            .chunks("dir/b:2.ipynb", &[&cell]);
        SessionRegistry::new(context(source, ScriptedConnector::new()))
    }

    #[test]
    fn descriptor_names_round_trip() {
        let d = CloneDescriptor {
            notebook_path: "dir/b:2.ipynb".into(),
            index: 4,
        };
        assert_eq!(d.name(), "dir/b:2.ipynb:4");
        assert_eq!(CloneDescriptor::parse(&d.name()), Some(d));
        assert_eq!(CloneDescriptor::parse("no-index"), None);
        assert_eq!(CloneDescriptor::parse(":3"), None);
        assert_eq!(CloneDescriptor::parse("a.ipynb:x"), None);
    }

    #[tokio::test]
    async fn open_reuses_live_sessions() {
        let registry = registry();
        let first = registry.open("a.ipynb");
        let second = registry.open("a.ipynb");
        second.populated().await.unwrap();
        assert_eq!(first.outputs().len(), 1);
        assert_eq!(registry.paths(), vec!["a.ipynb".to_string()]);

        first.dispose();
        assert!(registry.get("a.ipynb").is_none());
        assert!(registry.paths().is_empty());

        let reopened = registry.open("a.ipynb");
        assert!(!reopened.is_disposed());
    }

    #[tokio::test]
    async fn restore_recreates_clone() {
        let registry = registry();
        let descriptor = CloneDescriptor::parse("dir/b:2.ipynb:0").unwrap();

        let clone = registry.restore(&descriptor);
        assert!(clone.ready().await.is_some());
        assert_eq!(clone.descriptor(), descriptor);
        assert_eq!(registry.get("dir/b:2.ipynb").unwrap().clone_count(), 1);
    }

    #[tokio::test]
    async fn close_and_dispose_all() {
        let registry = registry();
        let a = registry.open("a.ipynb");
        let b = registry.open("dir/b:2.ipynb");

        assert!(registry.close("a.ipynb"));
        assert!(!registry.close("a.ipynb"));
        assert!(a.is_disposed());

        registry.dispose_all();
        assert!(b.is_disposed());
        assert!(registry.paths().is_empty());
    }
}
