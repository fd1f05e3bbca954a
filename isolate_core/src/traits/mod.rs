//! Collaborator traits.
//!
//! The runtime talks to the host through these seams: code resolution,
//! output lines and process-wide registries that may hold state owned by
//! a domain.

pub mod registry;
pub mod resolver;
pub mod sink;

pub use registry::OwnershipRegistry;
pub use resolver::Resolver;
pub use sink::LineSink;
