//! Process-wide registries holding state owned by domains.

use crate::id::DomainId;

/// A process-wide registry whose entries can be tagged with the domain
/// that created them.
///
/// Teardown calls [`revoke_owned`](Self::revoke_owned) on every registered
/// registry until none of them reports entries left for the domain.
pub trait OwnershipRegistry: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Number of entries currently owned by `domain`.
    fn owned_count(&self, domain: DomainId) -> usize;

    /// Remove every entry owned by `domain`.
    ///
    /// # Returns
    ///
    /// The names of the removed entries.
    fn revoke_owned(&self, domain: DomainId) -> Vec<String>;
}
