//! Error types for isolation domains.
//!
//! Lifecycle and resolution errors fail the triggering call locally.
//! Failures raised by a unit of work always reach the caller as a
//! [`BoundaryFailure`]; teardown that runs out of retries is reported as
//! [`TeardownIncomplete`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FailureRecord, Frame};

/// Owner name of the synthetic boundary frame.
pub const BOUNDARY_OWNER: &str = "<domain-boundary>";

/// Root error type for the isolation runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("{0}")]
    Boundary(Box<BoundaryFailure>),

    #[error("{0}")]
    TeardownIncomplete(#[from] TeardownIncomplete),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The boundary failure, if this is one.
    pub fn as_boundary(&self) -> Option<&BoundaryFailure> {
        match self {
            Self::Boundary(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether the call failed because the domain was not running.
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::Lifecycle(LifecycleError::NotRunning(_)))
    }

    /// Whether the call failed because a name could not be resolved.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Namespace(NamespaceError::NotFound(_)))
    }
}

impl From<BoundaryFailure> for Error {
    fn from(failure: BoundaryFailure) -> Self {
        Self::Boundary(Box::new(failure))
    }
}

/// Errors raised while resolving names in a namespace.
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unreadable resource location {location}: {reason}")]
    Unreadable { location: String, reason: String },
}

/// Errors caused by using a domain in the wrong lifecycle state.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Domain [{0}] is not running")]
    NotRunning(String),

    #[error("Domain [{0}] has already been started")]
    AlreadyStarted(String),

    #[error("Domain [{0}] stopped before producing a result")]
    Stopped(String),

    #[error("Domain [{domain}] did not accept work within {waited_ms}ms")]
    HandoffTimeout { domain: String, waited_ms: u64 },
}

/// Errors raised while copying values across the boundary.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("Failed to encode {type_name}: {reason}")]
    Encode { type_name: String, reason: String },

    #[error("Failed to decode {type_name}: {reason}")]
    Decode { type_name: String, reason: String },

    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Field {field} missing while rebuilding {type_name}")]
    MissingField { type_name: String, field: String },

    #[error("Exported object has no method {interface}.{method}")]
    MissingMethod { interface: String, method: String },

    #[error("Proxy has no forwarding entry for {0}")]
    UnknownMethod(String),
}

/// Where a failure crossed the boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundarySite {
    /// Raised by a submitted unit of work.
    Exec,

    /// Raised through a boundary proxy bound to `target`.
    Proxy { target: String },
}

impl BoundarySite {
    /// Function label of the boundary frame.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exec => "<exec>",
            Self::Proxy { .. } => "<proxy>",
        }
    }
}

/// A failure raised inside a domain, annotated where it crossed into the
/// host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundaryFailure {
    domain: String,
    site: BoundarySite,
    cause: FailureRecord,
    frames: Vec<Frame>,
}

impl BoundaryFailure {
    /// Assemble a failure from already woven frames.
    pub fn new(domain: impl Into<String>, site: BoundarySite, cause: FailureRecord, frames: Vec<Frame>) -> Self {
        Self {
            domain: domain.into(),
            site,
            cause,
            frames,
        }
    }

    /// Name of the domain the failure came from.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn site(&self) -> &BoundarySite {
        &self.site
    }

    /// The original failure, untouched by weaving.
    pub fn cause(&self) -> &FailureRecord {
        &self.cause
    }

    /// The woven stack: domain frames, markers, then host frames.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The `<domain-boundary>` frame.
    pub fn boundary_frame(&self) -> Option<&Frame> {
        self.frames.iter().find(|f| f.owner == BOUNDARY_OWNER)
    }

    /// Multi-line rendering in the usual "message, then frames" layout.
    pub fn render(&self) -> String {
        let mut out = self.to_string();
        for frame in &self.frames {
            out.push_str("\n    ");
            out.push_str(&frame.to_string());
        }
        for cause in &self.cause.chain {
            out.push_str("\nCaused by: ");
            out.push_str(cause);
        }
        out
    }
}

impl fmt::Display for BoundaryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.domain, self.cause)
    }
}

impl std::error::Error for BoundaryFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Teardown ran out of retries with domain threads still alive.
#[derive(Clone, Debug, Error)]
#[error("Domain [{domain}] clean up failed after {retries} retries, {} thread(s) left: {}", .remaining.len(), .remaining.join(", "))]
pub struct TeardownIncomplete {
    /// Domain name.
    pub domain: String,

    /// Passes performed.
    pub retries: u32,

    /// Names of threads that were still alive.
    pub remaining: Vec<String>,
}

/// Error raised by a unit of work.
///
/// Any `std::error::Error` converts into it with `?`, keeping its type
/// name and source chain so the host sees the original failure.
pub struct TaskError {
    record: FailureRecord,
}

impl TaskError {
    /// A plain failure with a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            record: FailureRecord::new(std::any::type_name::<Self>(), message),
        }
    }

    /// Wrap a portable record.
    pub fn from_record(record: FailureRecord) -> Self {
        Self { record }
    }

    /// Record a frame on the inside of the domain.
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.record.frames.push(frame);
        self
    }

    pub fn record(&self) -> &FailureRecord {
        &self.record
    }

    pub fn into_record(self) -> FailureRecord {
        self.record
    }
}

impl<E> From<E> for TaskError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            record: FailureRecord::from_error(&error),
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskError").field(&self.record).finish()
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.record, f)
    }
}

/// Result type used throughout the isolation runtime.
pub type Result<T> = std::result::Result<T, Error>;
