//! Line sinks for domain output.

use std::io::Write;

use parking_lot::Mutex;
use tracing::info;

use isolate_core::traits::LineSink;

/// Writes `[name] line` to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl LineSink for StderrSink {
    fn write_line(&self, domain: &str, line: &str) {
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        let _ = writeln!(out, "[{}] {}", domain, line);
    }
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn write_line(&self, domain: &str, line: &str) {
        info!(target: "isolate::output", domain, "{}", line);
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines, rendered with their domain prefix.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .map(|(domain, line)| format!("[{}] {}", domain, line))
            .collect()
    }

    /// Lines written for `domain`, without prefix.
    pub fn lines_for(&self, domain: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LineSink for MemorySink {
    fn write_line(&self, domain: &str, line: &str) {
        self.lines.lock().push((domain.to_string(), line.to_string()));
    }
}
