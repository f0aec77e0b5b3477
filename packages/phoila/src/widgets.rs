//! Widget module registry and the per-session widget manager.
//!
//! The registry is process-wide: third-party widget packages register their
//! modules once. Every [`WidgetManager`] starts with the modules already
//! registered and picks up later registrations for as long as it lives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::kernel::KernelConnection;

/// Output data of this type is a live widget view that needs a manager.
pub const WIDGET_VIEW_MIME_TYPE: &str = "application/vnd.jupyter.widget-view+json";

const REGISTRY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WidgetModule {
    pub name: String,
    pub version: String,
}

impl WidgetModule {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

struct RegistryInner {
    modules: RwLock<Vec<WidgetModule>>,
    registered: broadcast::Sender<WidgetModule>,
    disposed: AtomicBool,
}

#[derive(Clone)]
pub struct WidgetRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetRegistry {
    pub fn new() -> Self {
        let (registered, _) = broadcast::channel(REGISTRY_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                modules: RwLock::new(Vec::new()),
                registered,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns false if the registry is disposed or already has the module.
    pub fn register(&self, module: WidgetModule) -> bool {
        if self.is_disposed() {
            return false;
        }
        {
            let mut modules = self.inner.modules.write();
            if modules.contains(&module) {
                return false;
            }
            modules.push(module.clone());
        }
        debug!(name = %module.name, version = %module.version, "widget module registered");
        let _ = self.inner.registered.send(module);
        true
    }

    pub fn modules(&self) -> Vec<WidgetModule> {
        self.inner.modules.read().clone()
    }

    /// Registrations made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetModule> {
        self.inner.registered.subscribe()
    }

    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.modules.write().clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ManagerInner {
    kernel: KernelConnection,
    modules: RwLock<Vec<WidgetModule>>,
}

/// Renders widget views for one session, backed by that session's kernel.
#[derive(Debug, Clone)]
pub struct WidgetManager {
    inner: Arc<ManagerInner>,
}

impl WidgetManager {
    /// Must be called within a Tokio runtime.
    pub fn new(kernel: KernelConnection, registry: &WidgetRegistry) -> Self {
        // Subscribe before the snapshot so nothing registered in between is
        // missed; duplicates are filtered in `register`.
        let mut updates = registry.subscribe();
        let manager = Self {
            inner: Arc::new(ManagerInner {
                kernel,
                modules: RwLock::new(Vec::new()),
            }),
        };
        for module in registry.modules() {
            manager.register(module);
        }

        let weak: Weak<ManagerInner> = Arc::downgrade(&manager.inner);
        tokio::spawn(async move {
            loop {
                let module = match updates.recv().await {
                    Ok(module) => module,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                WidgetManager { inner }.register(module);
            }
        });

        manager
    }

    pub fn kernel(&self) -> &KernelConnection {
        &self.inner.kernel
    }

    pub fn register(&self, module: WidgetModule) {
        let mut modules = self.inner.modules.write();
        if !modules.contains(&module) {
            modules.push(module);
        }
    }

    pub fn modules(&self) -> Vec<WidgetModule> {
        self.inner.modules.read().clone()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.inner.modules.read().iter().any(|m| m.name == name)
    }

    pub fn renders(&self, mime_type: &str) -> bool {
        mime_type == WIDGET_VIEW_MIME_TYPE
    }
}
