//! Per-domain namespace loader.
//!
//! A [`NamespaceLoader`] defines the names a domain owns privately and
//! delegates everything else to the host [`Resolver`]. Owned names get a
//! fresh [`Code`] per domain, so two domains loading `acme::Order` end up
//! with two distinct definitions even when both read the same bytes.

pub mod host;

pub use host::{Bundle, HostNamespace};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use isolate_core::error::{LifecycleError, NamespaceError, Result};
use isolate_core::id::DomainId;
use isolate_core::traits::Resolver;
use isolate_core::types::{Code, Resource};

/// Which names a domain defines itself and where it may look for them.
#[derive(Clone, Debug, Default)]
pub struct LoaderPolicy {
    /// Name prefixes defined privately by the domain, in order.
    pub owned_prefixes: Vec<String>,

    /// Names always delegated to the host, even when a prefix matches.
    pub excludes: HashSet<String>,

    /// Additional locations, searched before the host resource path.
    pub extra_locations: Vec<Arc<Bundle>>,

    /// Location prefixes that must never supply a definition.
    pub forbidden: Vec<String>,
}

impl LoaderPolicy {
    /// A policy owning the given prefixes.
    pub fn owning<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owned_prefixes: prefixes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether `name` is defined privately under this policy.
    pub fn owns(&self, name: &str) -> bool {
        !self.excludes.contains(name) && self.owned_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Whether `resource` comes from a forbidden location.
    pub fn is_forbidden(&self, resource: &Resource) -> bool {
        self.forbidden.iter().any(|f| resource.location.starts_with(f))
    }
}

/// Resolves names on behalf of one domain.
pub struct NamespaceLoader {
    /// Owning domain.
    domain: DomainId,

    /// Domain name, recorded on private definitions.
    name: RwLock<String>,

    /// Host resolution strategy.
    host: Arc<dyn Resolver>,

    /// Current policy.
    policy: RwLock<LoaderPolicy>,

    /// Definitions handed out by this loader.
    definitions: DashMap<String, Arc<Code>>,

    /// Set once the domain is torn down.
    released: AtomicBool,
}

impl NamespaceLoader {
    /// Create a loader for `domain`.
    pub fn new(domain: DomainId, name: impl Into<String>, host: Arc<dyn Resolver>, policy: LoaderPolicy) -> Self {
        Self {
            domain,
            name: RwLock::new(name.into()),
            host,
            policy: RwLock::new(policy),
            definitions: DashMap::new(),
            released: AtomicBool::new(false),
        }
    }

    /// The owning domain.
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// The host resolver this loader delegates to.
    pub fn host(&self) -> &Arc<dyn Resolver> {
        &self.host
    }

    /// Resolve `name` to a definition.
    ///
    /// # Arguments
    ///
    /// * `name` - The fully-qualified name to resolve.
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<Code>)` - A domain-private definition for owned names, the
    ///   host definition otherwise. Repeated calls return the same `Arc`.
    /// * `Err(NamespaceError::NotFound)` - If no permitted location
    ///   provides an owned name, or the host definition comes from a
    ///   forbidden location.
    /// * `Err(LifecycleError::NotRunning)` - If the domain was torn down.
    pub fn resolve(&self, name: &str) -> Result<Arc<Code>> {
        if self.is_released() {
            return Err(LifecycleError::NotRunning(self.name()).into());
        }
        if let Some(code) = self.definitions.get(name) {
            trace!(name, "Namespace cache hit");
            return Ok(code.value().clone());
        }

        let code = {
            let policy = self.policy.read();
            if policy.owns(name) {
                let resource = self
                    .find_resource(&policy, name)
                    .ok_or_else(|| NamespaceError::NotFound(name.to_string()))?;
                let code = Arc::new(Code::domain(self.domain, &self.name.read(), &resource));
                debug!(name, location = %resource.location, "Defined domain-private code");
                code
            } else {
                let code = self.host.resolve(name)?;
                if let Some(location) = code.location() {
                    if policy.forbidden.iter().any(|f| location.starts_with(f)) {
                        debug!(name, %location, "Host definition comes from a forbidden location");
                        return Err(NamespaceError::NotFound(name.to_string()).into());
                    }
                }
                code
            }
        };

        let entry = self.definitions.entry(name.to_string()).or_insert(code);
        Ok(entry.value().clone())
    }

    /// The first permitted resource providing `name`.
    pub fn resource(&self, name: &str) -> Option<Resource> {
        if self.is_released() {
            return None;
        }
        let policy = self.policy.read();
        self.find_resource(&policy, name)
    }

    /// Every permitted resource providing `name`: extra locations first,
    /// then the host resource path.
    pub fn resources(&self, name: &str) -> Vec<Resource> {
        if self.is_released() {
            return Vec::new();
        }
        let policy = self.policy.read();
        let mut found: Vec<Resource> = policy.extra_locations.iter().filter_map(|b| b.get(name)).collect();
        found.extend(
            self.host
                .resources(name)
                .into_iter()
                .filter(|r| !policy.is_forbidden(r)),
        );
        found
    }

    /// Extra locations first, then the first host resource. A forbidden
    /// first host resource shadows any later one.
    fn find_resource(&self, policy: &LoaderPolicy, name: &str) -> Option<Resource> {
        policy.extra_locations.iter().find_map(|b| b.get(name)).or_else(|| {
            self.host
                .resources(name)
                .into_iter()
                .next()
                .filter(|r| !policy.is_forbidden(r))
        })
    }

    /// Whether `name` would be defined privately.
    pub fn is_owned(&self, name: &str) -> bool {
        self.policy.read().owns(name)
    }

    /// The cached definition of `name`, without resolving.
    pub fn cached(&self, name: &str) -> Option<Arc<Code>> {
        self.definitions.get(name).map(|c| c.value().clone())
    }

    /// Number of cached definitions.
    pub fn cached_count(&self) -> usize {
        self.definitions.len()
    }

    /// Search `bundle` before the host resource path.
    pub fn add_location(&self, bundle: Bundle) {
        debug!(location = %bundle.location(), "Adding extra location");
        self.policy.write().extra_locations.push(Arc::new(bundle));
    }

    /// Stop searching the extra location at `location`.
    pub fn remove_location(&self, location: &str) -> bool {
        let mut policy = self.policy.write();
        let before = policy.extra_locations.len();
        policy.extra_locations.retain(|b| b.location().as_str() != location);
        before != policy.extra_locations.len()
    }

    /// Never take definitions from locations starting with `prefix`.
    pub fn forbid_location(&self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        debug!(prefix = %prefix, "Forbidding location");
        let mut policy = self.policy.write();
        if !policy.forbidden.contains(&prefix) {
            policy.forbidden.push(prefix);
        }
    }

    /// Lift a previous [`forbid_location`](Self::forbid_location).
    pub fn allow_location(&self, prefix: &str) -> bool {
        let mut policy = self.policy.write();
        let before = policy.forbidden.len();
        policy.forbidden.retain(|f| f != prefix);
        before != policy.forbidden.len()
    }

    /// Always delegate `name` to the host.
    pub fn exclude(&self, name: impl Into<String>) {
        self.policy.write().excludes.insert(name.into());
    }

    /// A snapshot of the current policy.
    pub fn policy(&self) -> LoaderPolicy {
        self.policy.read().clone()
    }

    pub(crate) fn rename(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    /// Whether the owning domain was torn down.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Drop every cached definition and refuse further resolution.
    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.definitions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolate_core::types::Definer;

    fn host() -> Arc<HostNamespace> {
        Arc::new(
            HostNamespace::new()
                .with_bundle(Bundle::new("mem:lib/app/").with("acme::Order", b"order").with("acme::Shared", b"shared"))
                .with_bundle(Bundle::new("mem:lib/vendor/").with("vendor::Codec", b"codec")),
        )
    }

    fn loader(host: Arc<HostNamespace>) -> NamespaceLoader {
        NamespaceLoader::new(DomainId::new(), "alpha", host, LoaderPolicy::owning(["acme::"]))
    }

    #[test]
    fn test_owned_names_are_private() {
        let host = host();
        let a = loader(host.clone());
        let b = loader(host.clone());

        let in_a = a.resolve("acme::Order").unwrap();
        let in_b = b.resolve("acme::Order").unwrap();
        let in_host = host.resolve("acme::Order").unwrap();

        assert!(in_a.is_owned_by(a.domain()));
        assert!(!in_a.same_definition(&in_b));
        assert!(!in_a.same_definition(&in_host));
        assert!(Arc::ptr_eq(&in_a, &a.resolve("acme::Order").unwrap()));
    }

    #[test]
    fn test_excluded_names_delegate() {
        let host = host();
        let a = loader(host.clone());
        let b = loader(host.clone());
        a.exclude("acme::Shared");
        b.exclude("acme::Shared");

        let in_a = a.resolve("acme::Shared").unwrap();
        let in_b = b.resolve("acme::Shared").unwrap();
        assert_eq!(in_a.definer(), &Definer::Host);
        assert!(Arc::ptr_eq(&in_a, &in_b));
    }

    #[test]
    fn test_missing_owned_name_is_not_found() {
        let a = loader(host());
        let err = a.resolve("acme::Missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_forbidden_location() {
        let a = loader(host());
        a.forbid_location("mem:lib/vendor/");
        assert!(a.resolve("vendor::Codec").unwrap_err().is_not_found());

        a.forbid_location("mem:lib/app/");
        assert!(a.resolve("acme::Order").unwrap_err().is_not_found());
        assert!(a.resource("acme::Order").is_none());
    }

    #[test]
    fn test_extra_locations_searched_first() {
        let a = loader(host());
        a.add_location(Bundle::new("mem:patch/").with("acme::Order", b"patched"));

        let code = a.resolve("acme::Order").unwrap();
        assert_eq!(code.location().map(|l| l.as_str()), Some("mem:patch/"));

        let all: Vec<String> = a.resources("acme::Order").iter().map(|r| r.location.to_string()).collect();
        assert_eq!(all, vec!["mem:patch/", "mem:lib/app/"]);

        assert!(a.remove_location("mem:patch/"));
        assert_eq!(a.resource("acme::Order").unwrap().location.as_str(), "mem:lib/app/");
    }

    #[test]
    fn test_allow_location_and_release() {
        let a = loader(host());
        a.forbid_location("mem:lib/app/");
        assert!(a.allow_location("mem:lib/app/"));
        assert!(a.resolve("acme::Order").is_ok());
        assert_eq!(a.cached_count(), 1);
        a.release();
        assert!(a.cached("acme::Order").is_none());
        assert!(a.is_released());
        assert!(a.resolve("acme::Order").unwrap_err().is_not_running());
        assert!(a.resource("acme::Order").is_none());
        assert!(a.resources("acme::Order").is_empty());
    }

    #[test]
    fn test_forbidden_first_host_resource_shadows_later_ones() {
        let host = Arc::new(
            HostNamespace::new()
                .with_bundle(Bundle::new("mem:a/").with("acme::Order", b"first"))
                .with_bundle(Bundle::new("mem:b/").with("acme::Order", b"second")),
        );
        let a = loader(host);
        a.forbid_location("mem:a/");

        assert!(a.resolve("acme::Order").unwrap_err().is_not_found());
        assert!(a.resource("acme::Order").is_none());

        // The full listing still offers the permitted copy.
        let all: Vec<String> = a.resources("acme::Order").iter().map(|r| r.location.to_string()).collect();
        assert_eq!(all, vec!["mem:b/"]);
    }
}
