//! Configuration for isolation domains.
//!
//! Poll intervals and retry ceilings for hand-off and teardown are plain
//! configuration; the defaults reproduce the usual behavior (100ms hand-off
//! polls, 10ms teardown passes, give up after 1000 passes).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for an isolation domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolateConfig {
    /// How long a single hand-off attempt waits for the worker, in milliseconds.
    pub handoff_poll_ms: u64,

    /// Hand-off attempts before giving up with a timeout.
    pub handoff_attempts: u32,

    /// How often a blocked caller re-checks domain liveness, in milliseconds.
    pub result_poll_ms: u64,

    /// How long `stop` waits to hand off the stop marker, in milliseconds.
    pub stop_handoff_timeout_ms: u64,

    /// Pause between teardown passes, in milliseconds.
    pub teardown_pause_ms: u64,

    /// Teardown passes before the teardown is reported incomplete.
    pub teardown_retry_limit: u32,

    /// Teardown passes before surviving threads are doomed.
    pub doom_after_retries: u32,

    /// Report the last checkpoint of stuck threads every this many passes.
    pub stack_dump_every: u32,

    /// Capture a host backtrace when weaving boundary failures.
    pub capture_backtrace: bool,

    /// Log level for tracing.
    pub log_level: String,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            handoff_poll_ms: 100,
            handoff_attempts: 50,
            result_poll_ms: 100,
            stop_handoff_timeout_ms: 1000,
            teardown_pause_ms: 10,
            teardown_retry_limit: 1000,
            doom_after_retries: 24,
            stack_dump_every: 10,
            capture_backtrace: false,
            log_level: "info".to_string(),
        }
    }
}

impl IsolateConfig {
    pub fn handoff_poll(&self) -> Duration {
        Duration::from_millis(self.handoff_poll_ms)
    }

    pub fn result_poll(&self) -> Duration {
        Duration::from_millis(self.result_poll_ms)
    }

    pub fn stop_handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_handoff_timeout_ms)
    }

    pub fn teardown_pause(&self) -> Duration {
        Duration::from_millis(self.teardown_pause_ms)
    }

    /// Check the settings for values that would make a domain unusable.
    pub fn validate(&self) -> Result<()> {
        if self.handoff_attempts == 0 {
            return Err(Error::Config("handoff_attempts must be at least 1".to_string()));
        }
        if self.handoff_poll_ms == 0 || self.result_poll_ms == 0 {
            return Err(Error::Config("poll intervals must be positive".to_string()));
        }
        if self.doom_after_retries > self.teardown_retry_limit {
            return Err(Error::Config(format!(
                "doom_after_retries ({}) exceeds teardown_retry_limit ({})",
                self.doom_after_retries, self.teardown_retry_limit
            )));
        }
        Ok(())
    }
}

/// Load configuration from a file.
pub fn load_config(path: &Path) -> Result<IsolateConfig> {
    // Check file extension
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

    let config: IsolateConfig = match ext {
        "toml" => toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?,
        "json" => serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?,
        _ => return Err(Error::Config(format!("Unsupported config file format: {}", ext))),
    };

    config.validate()?;
    Ok(config)
}

/// Save configuration to a file.
pub fn save_config(config: &IsolateConfig, path: &Path) -> Result<()> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let content = match ext {
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize TOML config: {}", e)))?,
        "json" => serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize JSON config: {}", e)))?,
        _ => return Err(Error::Config(format!("Unsupported config file format: {}", ext))),
    };

    std::fs::write(path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IsolateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.teardown_pause(), Duration::from_millis(10));
        assert_eq!(config.teardown_retry_limit, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = IsolateConfig {
            handoff_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_late_doom() {
        let config = IsolateConfig {
            teardown_retry_limit: 5,
            doom_after_retries: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
