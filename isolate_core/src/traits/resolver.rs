//! Host code resolution.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Code, Resource};

/// Resolution strategy of the host namespace.
///
/// A domain's namespace loader delegates every name it does not own to a
/// `Resolver`. Implementations must be idempotent: resolving the same name
/// twice returns the same definition.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use isolate_core::error::{NamespaceError, Result};
/// use isolate_core::traits::Resolver;
/// use isolate_core::types::{Code, Resource};
///
/// struct NothingButIntrinsics(Arc<Code>);
///
/// impl Resolver for NothingButIntrinsics {
///     fn resolve(&self, name: &str) -> Result<Arc<Code>> {
///         if name == self.0.name() {
///             Ok(self.0.clone())
///         } else {
///             Err(NamespaceError::NotFound(name.to_string()).into())
///         }
///     }
///
///     fn resources(&self, _name: &str) -> Vec<Resource> {
///         Vec::new()
///     }
/// }
///
/// let resolver = NothingButIntrinsics(Arc::new(Code::intrinsic("u64")));
/// assert!(resolver.resolve("u64").is_ok());
/// assert!(resolver.resolve("acme.Order").is_err());
/// ```
pub trait Resolver: Send + Sync {
    /// Resolve a name to its host definition.
    ///
    /// # Arguments
    ///
    /// * `name` - The fully-qualified name to resolve.
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<Code>)` - The definition, identical on every call.
    /// * `Err(NamespaceError::NotFound)` - If nothing defines the name.
    fn resolve(&self, name: &str) -> Result<Arc<Code>>;

    /// Every resource providing `name`, in search order.
    fn resources(&self, name: &str) -> Vec<Resource>;

    /// The first resource providing `name`.
    fn resource(&self, name: &str) -> Option<Resource> {
        self.resources(name).into_iter().next()
    }
}
