//! Process-wide shutdown hooks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use isolate_core::id::{DomainId, HookId};
use isolate_core::traits::OwnershipRegistry;

type HookAction = Box<dyn FnOnce() + Send>;

struct HookEntry {
    name: String,
    owner: Option<DomainId>,
    action: Mutex<Option<HookAction>>,
}

/// Actions the host runs when it shuts down.
///
/// Hooks registered from inside a domain are tagged with the domain id, so
/// teardown can revoke them: a torn-down domain must not leave code behind
/// that the host would later run.
#[derive(Default)]
pub struct ShutdownHooks {
    hooks: DashMap<HookId, HookEntry>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<ShutdownHooks> {
        static GLOBAL: OnceLock<Arc<ShutdownHooks>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ShutdownHooks::new())).clone()
    }

    /// Register `action`, optionally owned by a domain.
    pub fn register<F>(&self, name: impl Into<String>, owner: Option<DomainId>, action: F) -> HookId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = HookId::new();
        let name = name.into();
        debug!(hook = %name, ?owner, "Registered shutdown hook");
        self.hooks.insert(
            id,
            HookEntry {
                name,
                owner,
                action: Mutex::new(Some(Box::new(action))),
            },
        );
        id
    }

    /// Remove a hook without running it.
    pub fn remove(&self, id: HookId) -> bool {
        self.hooks.remove(&id).is_some()
    }

    /// Run and remove every hook.
    ///
    /// # Returns
    ///
    /// The number of hooks that ran to completion.
    pub fn run_all(&self) -> usize {
        let ids: Vec<HookId> = self.hooks.iter().map(|e| *e.key()).collect();
        let mut completed = 0;
        for id in ids {
            let Some((_, entry)) = self.hooks.remove(&id) else {
                continue;
            };
            let Some(action) = entry.action.lock().take() else {
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(()) => completed += 1,
                Err(_) => warn!(hook = %entry.name, "Shutdown hook panicked"),
            }
        }
        completed
    }

    /// Names of the hooks owned by `domain`.
    pub fn names_owned_by(&self, domain: DomainId) -> Vec<String> {
        self.hooks
            .iter()
            .filter(|e| e.owner == Some(domain))
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl OwnershipRegistry for ShutdownHooks {
    fn name(&self) -> &str {
        "shutdown hook"
    }

    fn owned_count(&self, domain: DomainId) -> usize {
        self.hooks.iter().filter(|e| e.owner == Some(domain)).count()
    }

    fn revoke_owned(&self, domain: DomainId) -> Vec<String> {
        let owned: Vec<HookId> = self
            .hooks
            .iter()
            .filter(|e| e.owner == Some(domain))
            .map(|e| *e.key())
            .collect();
        owned
            .into_iter()
            .filter_map(|id| self.hooks.remove(&id))
            .map(|(_, entry)| entry.name)
            .collect()
    }
}
