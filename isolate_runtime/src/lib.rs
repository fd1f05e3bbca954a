//! # Isolate Runtime
//!
//! In-process isolation domains. A domain is a named execution context
//! inside the current process with its own namespace, its own properties
//! and its own output, served by one dedicated worker thread.
//!
//! Key pieces:
//!
//! 1. **Namespace loader** ([`namespace`]): defines owned names privately,
//!    delegates the rest to the host.
//!
//! 2. **Marshaler** ([`marshal`]): copies values across the boundary and
//!    exports live objects behind boundary proxies.
//!
//! 3. **Weaver** ([`weaver`]): annotates failures where they cross into
//!    the host.
//!
//! 4. **Supervisor** ([`Isolate`]): lifecycle, hand-off of work and
//!    escalating teardown.

pub mod context;
mod domain;
pub mod hooks;
pub mod isolate;
pub mod marshal;
pub mod namespace;
pub mod properties;
pub mod sink;
pub mod teardown;
mod threads;
pub mod weaver;
pub mod worker;

pub use context::{DomainContext, DomainWriter, Interrupted};
pub use hooks::ShutdownHooks;
pub use isolate::{Isolate, IsolateBuilder};
pub use marshal::{
    BoundaryProxy, Exportable, Interface, Marshaled, Marshaler, MethodTable, Portable, Reconstruct, Side,
};
pub use namespace::{Bundle, HostNamespace, LoaderPolicy, NamespaceLoader};
pub use sink::{MemorySink, StderrSink, TracingSink};
pub use teardown::TeardownReport;
pub use worker::Task;
