//! Domain-local properties.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// Property holding the domain name.
pub const NAME_PROPERTY: &str = "isolate.name";

/// A domain's private key/value store.
///
/// Seeded from host-supplied values when the domain is built; changes
/// made inside the domain never reach the host's environment. Once
/// closed the store stays empty and ignores writes.
#[derive(Debug, Default)]
pub struct Properties {
    values: RwLock<BTreeMap<String, String>>,
    closed: AtomicBool,
}

impl Properties {
    /// Seed a store with `values` and the domain name.
    pub fn seeded(values: BTreeMap<String, String>, domain: &str) -> Self {
        let properties = Self {
            values: RwLock::new(values),
            closed: AtomicBool::new(false),
        };
        properties.set(NAME_PROPERTY, domain);
        properties
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let mut map = self.values.write();
        if self.is_closed() {
            return None;
        }
        map.insert(key.into(), value.into())
    }

    /// Set several values at once.
    pub fn set_all<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = self.values.write();
        if self.is_closed() {
            return;
        }
        for (key, value) in values {
            map.insert(key.into(), value.into());
        }
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }

    /// A copy of every property.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop every value and ignore later writes.
    pub fn close(&self) {
        let mut map = self.values.write();
        self.closed.store(true, Ordering::SeqCst);
        map.clear();
    }
}
