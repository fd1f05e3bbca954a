//! Data types shared between the runtime and its collaborators.

pub mod code;
pub mod failure;

pub use code::{Code, Definer, Location, Resource};
pub use failure::{FailureRecord, Frame};

use serde::{Deserialize, Serialize};

/// Lifecycle of an isolation domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainState {
    /// Allocated, worker not spawned yet.
    Created,

    /// Worker is pulling units of work.
    Running,

    /// Teardown in progress.
    Stopping,

    /// Torn down; terminal.
    Stopped,
}

impl DomainState {
    /// Whether units of work may be handed off.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Running)
    }
}
