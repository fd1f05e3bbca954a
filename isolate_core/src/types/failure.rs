//! Portable failure records and stack frames.
//!
//! Failures raised inside a domain cross the boundary as data: the error
//! type name, its message, the messages of its source chain and whatever
//! frames were recorded on the way.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One entry of a failure's causal stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Owning module, type or marker name.
    pub owner: String,

    /// Function or operation name (may be empty).
    pub function: String,

    /// Source file, or the domain name for boundary markers.
    pub file: Option<String>,

    /// Line number when known.
    pub line: Option<u32>,
}

impl Frame {
    /// Create a frame.
    pub fn new(owner: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            function: function.into(),
            file: None,
            line: None,
        }
    }

    /// Attach a file.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Attach a line number.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Frame for a `#[track_caller]` location.
    pub fn from_location(owner: impl Into<String>, location: &std::panic::Location<'_>) -> Self {
        Self::new(owner, "").with_file(location.file()).with_line(location.line())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.function.is_empty() {
            write!(f, "at {}", self.owner)?;
        } else {
            write!(f, "at {}::{}", self.owner, self.function)?;
        }
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " ({}:{})", file, line),
            (Some(file), None) => write!(f, " ({})", file),
            _ => Ok(()),
        }
    }
}

/// A failure in portable form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Type name of the original error (or `panic` for unwinds).
    pub type_name: String,

    /// The original error message.
    pub message: String,

    /// Messages of the original error's source chain, outermost first.
    pub chain: Vec<String>,

    /// Frames recorded inside the domain.
    pub frames: Vec<Frame>,
}

impl FailureRecord {
    /// Create a record without a source chain.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            chain: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Capture an error and its source chain.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            chain,
            frames: Vec::new(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for FailureRecord {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: io::Error,
    }

    #[test]
    fn test_record_captures_chain() {
        let err = Outer {
            inner: io::Error::new(io::ErrorKind::Other, "disk on fire"),
        };
        let record = FailureRecord::from_error(&err);
        assert!(record.type_name.ends_with("Outer"));
        assert_eq!(record.message, "outer failure");
        assert_eq!(record.chain, vec!["disk on fire".to_string()]);
    }

    #[test]
    fn test_frame_display() {
        let frame = Frame::new("<domain-boundary>", "<exec>").with_file("alpha");
        assert_eq!(frame.to_string(), "at <domain-boundary>::<exec> (alpha)");
        let marker = Frame::new("isolate_runtime::Isolate", "");
        assert_eq!(marker.to_string(), "at isolate_runtime::Isolate");
    }
}
