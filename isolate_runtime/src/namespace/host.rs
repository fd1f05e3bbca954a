//! Host-side namespace: the resource path shared by every domain.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use isolate_core::error::{NamespaceError, Result};
use isolate_core::traits::Resolver;
use isolate_core::types::{Code, Location, Resource};

/// A set of resources published under one location.
#[derive(Clone, Debug)]
pub struct Bundle {
    location: Location,
    entries: BTreeMap<String, Arc<[u8]>>,
}

impl Bundle {
    /// Create an empty bundle at `location`.
    pub fn new(location: impl Into<Location>) -> Self {
        Self {
            location: location.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Add a resource, builder style.
    pub fn with(mut self, name: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        self.insert(name, bytes);
        self
    }

    /// Add or replace a resource.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl AsRef<[u8]>) {
        self.entries.insert(name.into(), Arc::from(bytes.as_ref()));
    }

    /// Load every file below `dir`.
    ///
    /// A file at `acme/model/Order.def` provides the resource
    /// `acme::model::Order`: directories become path segments and the
    /// extension is dropped.
    pub fn from_dir(location: impl Into<Location>, dir: &Path) -> Result<Self> {
        let mut bundle = Self::new(location);
        let mut pending = vec![(dir.to_path_buf(), Vec::<String>::new())];

        while let Some((current, segments)) = pending.pop() {
            let entries = std::fs::read_dir(&current).map_err(|e| NamespaceError::Unreadable {
                location: current.display().to_string(),
                reason: e.to_string(),
            })?;

            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                let mut segments = segments.clone();
                if path.is_dir() {
                    segments.push(entry.file_name().to_string_lossy().into_owned());
                    pending.push((path, segments));
                } else if let Some(stem) = path.file_stem() {
                    segments.push(stem.to_string_lossy().into_owned());
                    let bytes = std::fs::read(&path)?;
                    bundle.insert(segments.join("::"), bytes);
                }
            }
        }

        debug!(location = %bundle.location, resources = bundle.len(), "Loaded bundle from directory");
        Ok(bundle)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The resource called `name`, if this bundle provides it.
    pub fn get(&self, name: &str) -> Option<Resource> {
        self.entries
            .get(name)
            .map(|bytes| Resource::new(name, self.location.clone(), bytes.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names of all resources, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The host namespace.
///
/// Holds an ordered resource path and caches every definition it hands
/// out, so all domains delegating the same name see the identical
/// [`Code`]. Names no bundle provides resolve to a shared intrinsic
/// definition: types compiled into the host always exist.
pub struct HostNamespace {
    /// Ordered resource path.
    path: RwLock<Vec<Arc<Bundle>>>,

    /// Definitions handed out so far.
    definitions: DashMap<String, Arc<Code>>,
}

impl HostNamespace {
    /// Create a host namespace with an empty resource path.
    pub fn new() -> Self {
        Self {
            path: RwLock::new(Vec::new()),
            definitions: DashMap::new(),
        }
    }

    /// The process-wide host namespace used when a domain is not given one.
    pub fn shared() -> Arc<HostNamespace> {
        static SHARED: OnceLock<Arc<HostNamespace>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(HostNamespace::new())).clone()
    }

    /// Append a bundle to the resource path, builder style.
    pub fn with_bundle(self, bundle: Bundle) -> Self {
        self.add_bundle(bundle);
        self
    }

    /// Append a bundle to the resource path.
    pub fn add_bundle(&self, bundle: Bundle) {
        debug!(location = %bundle.location(), "Adding bundle to host resource path");
        self.path.write().push(Arc::new(bundle));
    }

    /// Locations on the resource path, in search order.
    pub fn locations(&self) -> Vec<Location> {
        self.path.read().iter().map(|b| b.location().clone()).collect()
    }

    /// Number of definitions resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.definitions.len()
    }
}

impl Default for HostNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for HostNamespace {
    fn resolve(&self, name: &str) -> Result<Arc<Code>> {
        if let Some(code) = self.definitions.get(name) {
            return Ok(code.value().clone());
        }

        let code = match self.resource(name) {
            Some(resource) => Code::host(&resource),
            None => Code::intrinsic(name),
        };
        debug!(name, code = %code, "Host resolved definition");

        // First definition wins if two threads raced on the same name.
        let entry = self
            .definitions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(code));
        Ok(entry.value().clone())
    }

    fn resources(&self, name: &str) -> Vec<Resource> {
        self.path.read().iter().filter_map(|b| b.get(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolate_core::types::Definer;
    use std::fs;

    #[test]
    fn test_host_resolution_is_idempotent() {
        let host = HostNamespace::new().with_bundle(Bundle::new("mem:app/").with("acme::Order", b"v1"));
        let first = host.resolve("acme::Order").unwrap();
        let second = host.resolve("acme::Order").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.definer(), &Definer::Host);
        assert_eq!(first.location().map(Location::as_str), Some("mem:app/"));
    }

    #[test]
    fn test_unknown_names_are_intrinsic() {
        let host = HostNamespace::new();
        let code = host.resolve("alloc::string::String").unwrap();
        assert_eq!(code.definer(), &Definer::Intrinsic);
        assert!(code.location().is_none());
    }

    #[test]
    fn test_resources_follow_path_order() {
        let host = HostNamespace::new()
            .with_bundle(Bundle::new("mem:first/").with("acme::Order", b"first"))
            .with_bundle(Bundle::new("mem:second/").with("acme::Order", b"second"));
        let found: Vec<String> = host
            .resources("acme::Order")
            .into_iter()
            .map(|r| r.location.to_string())
            .collect();
        assert_eq!(found, vec!["mem:first/", "mem:second/"]);
        assert_eq!(host.resource("acme::Order").unwrap().bytes.as_ref(), b"first");
    }

    #[test]
    fn test_bundle_from_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("acme/model")).unwrap();
        fs::write(temp_dir.path().join("acme/model/Order.def"), b"order").unwrap();
        fs::write(temp_dir.path().join("Top.def"), b"top").unwrap();

        let bundle = Bundle::from_dir("file:lib/", temp_dir.path()).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.contains("acme::model::Order"));
        assert!(bundle.contains("Top"));
        assert_eq!(bundle.get("Top").unwrap().bytes.as_ref(), b"top");
    }

    #[test]
    fn test_bundle_from_missing_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(Bundle::from_dir("file:nope/", &missing).is_err());
    }
}
