//! # Isolate Core
//!
//! `isolate_core` holds the vocabulary shared by the isolation runtime and
//! its collaborators.
//!
//! Key concepts:
//!
//! 1. **Domain**: a named isolation context inside the current process.
//!
//! 2. **Code**: a definition resolved by a namespace; identity is its id,
//!    not its name.
//!
//! 3. **Boundary failure**: a failure raised inside a domain, woven with
//!    the frames marking where it crossed into the host.
//!
//! 4. **Collaborators**: host resolution, line output and process-wide
//!    registries, all behind traits.

pub mod config;
pub mod error;
pub mod id;
pub mod traits;
pub mod types;

pub use config::IsolateConfig;
pub use error::{
    BoundaryFailure, BoundarySite, Error, LifecycleError, MarshalError, NamespaceError, Result,
    TaskError, TeardownIncomplete,
};
pub use id::{CodeId, DomainId, ExportId, HookId};
pub use traits::{LineSink, OwnershipRegistry, Resolver};
pub use types::{Code, Definer, DomainState, FailureRecord, Frame, Location, Resource};
