//! Resolved code definitions and the resources they are defined from.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::{CodeId, DomainId};

/// A resource location (a URL-like string such as `mem:lib/app/` or
/// `file:///opt/app/lib/`).
///
/// Forbidden-location checks are prefix matches on this string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    /// Create a location from any string.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The location as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this location lies under `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A named resource found at a location.
#[derive(Clone, Debug)]
pub struct Resource {
    /// The resource name (the definition name it provides).
    pub name: String,

    /// Where the resource was found.
    pub location: Location,

    /// The raw definition bytes.
    pub bytes: Arc<[u8]>,
}

impl Resource {
    /// Create a resource.
    pub fn new(name: impl Into<String>, location: Location, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            location,
            bytes: bytes.into(),
        }
    }

    /// Content digest of the resource bytes.
    pub fn digest(&self) -> String {
        let mut hasher = DefaultHasher::new();
        hasher.write(&self.bytes);
        format!("{:016x}", hasher.finish())
    }
}

/// Who defined a piece of code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Definer {
    /// Compiled into the host; no resource backs it.
    Intrinsic,

    /// Defined by the host namespace from a resource.
    Host,

    /// Defined privately by an isolation domain.
    Domain {
        /// The owning domain.
        id: DomainId,
        /// Domain name at definition time.
        name: String,
    },
}

/// A resolved code definition.
///
/// Identity is the [`CodeId`]: two definitions with the same name but
/// different ids are different types as far as the boundary is concerned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Code {
    id: CodeId,
    name: String,
    definer: Definer,
    location: Option<Location>,
    digest: Option<String>,
}

impl Code {
    /// A host type that exists without any resource.
    pub fn intrinsic(name: impl Into<String>) -> Self {
        Self {
            id: CodeId::new(),
            name: name.into(),
            definer: Definer::Intrinsic,
            location: None,
            digest: None,
        }
    }

    /// A host definition backed by `resource`.
    pub fn host(resource: &Resource) -> Self {
        Self {
            id: CodeId::new(),
            name: resource.name.clone(),
            definer: Definer::Host,
            location: Some(resource.location.clone()),
            digest: Some(resource.digest()),
        }
    }

    /// A domain-private definition backed by `resource`.
    pub fn domain(domain: DomainId, domain_name: &str, resource: &Resource) -> Self {
        Self {
            id: CodeId::new(),
            name: resource.name.clone(),
            definer: Definer::Domain {
                id: domain,
                name: domain_name.to_string(),
            },
            location: Some(resource.location.clone()),
            digest: Some(resource.digest()),
        }
    }

    pub fn id(&self) -> CodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definer(&self) -> &Definer {
        &self.definer
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Whether the definition belongs to `domain`.
    pub fn is_owned_by(&self, domain: DomainId) -> bool {
        matches!(self.definer, Definer::Domain { id, .. } if id == domain)
    }

    /// Whether both handles denote the identical definition.
    pub fn same_definition(&self, other: &Code) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.definer {
            Definer::Intrinsic => write!(f, "{} (intrinsic)", self.name),
            Definer::Host => write!(f, "{} (host)", self.name),
            Definer::Domain { name, .. } => write!(f, "{} (domain {})", self.name, name),
        }
    }
}
