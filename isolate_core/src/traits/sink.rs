//! Line-oriented diagnostic output.

/// Receives diagnostic lines emitted on behalf of a domain.
///
/// The runtime never formats streams itself; it hands complete lines to a
/// sink together with the name of the domain they belong to, and the sink
/// decides how to prefix and where to write them.
pub trait LineSink: Send + Sync {
    /// Write one line (without trailing newline) for `domain`.
    fn write_line(&self, domain: &str, line: &str);
}
