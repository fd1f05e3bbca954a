//! Shared state of one isolation domain.

use std::sync::Arc;

use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use isolate_core::config::IsolateConfig;
use isolate_core::id::{DomainId, ExportId};
use isolate_core::traits::{LineSink, OwnershipRegistry};
use isolate_core::types::DomainState;

use crate::hooks::ShutdownHooks;
use crate::marshal::proxy::ExportedTarget;
use crate::marshal::Marshaler;
use crate::namespace::NamespaceLoader;
use crate::properties::Properties;
use crate::threads::{ThreadControl, ThreadGroup};
use crate::worker::WorkUnit;

/// Mutable lifecycle of a domain, guarded by one lock.
pub(crate) struct Lifecycle {
    /// Current state.
    pub state: DomainState,

    /// Sending end of the rendezvous work queue while running.
    pub queue: Option<Sender<WorkUnit>>,

    /// Control block of the worker thread.
    pub worker: Option<Arc<ThreadControl>>,

    /// Teardown passes performed so far.
    pub shutdown_retry: u32,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: DomainState::Created,
            queue: None,
            worker: None,
            shutdown_retry: 0,
        }
    }
}

/// A live object kept inside the domain for a boundary proxy.
pub(crate) type ExportSlot = Arc<Mutex<Box<dyn ExportedTarget>>>;

/// Everything a domain owns.
pub(crate) struct Domain {
    /// Unique identifier.
    pub id: DomainId,

    /// Current name; prefixes output lines.
    pub name: RwLock<String>,

    /// Tunables.
    pub config: IsolateConfig,

    /// The domain namespace.
    pub loader: Arc<NamespaceLoader>,

    /// Copies values across the boundary.
    pub marshaler: Marshaler,

    /// Domain-local properties.
    pub properties: Properties,

    /// Destination of diagnostic lines.
    pub sink: Arc<dyn LineSink>,

    /// Shutdown hooks reachable from tasks.
    pub hooks: Arc<ShutdownHooks>,

    /// Registries revoked during teardown.
    pub registries: Vec<Arc<dyn OwnershipRegistry>>,

    /// Threads owned by the domain.
    pub threads: ThreadGroup,

    /// Objects kept alive for boundary proxies.
    pub exports: DashMap<ExportId, ExportSlot>,

    /// Lifecycle state and the work queue.
    pub lifecycle: Mutex<Lifecycle>,
}

impl Domain {
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn state(&self) -> DomainState {
        self.lifecycle.lock().state
    }

    /// Write a line to the domain sink.
    pub fn println(&self, line: &str) {
        self.sink.write_line(&self.name(), line);
    }
}
