use std::path::Path;

use isolate_core::config::save_config;
use isolate_core::IsolateConfig;
use tracing::info;

use crate::error::CliError;

/// Print the configuration, or write it to `target`.
pub fn execute(config: &IsolateConfig, target: Option<&Path>) -> Result<(), CliError> {
    match target {
        Some(path) => {
            save_config(config, path)?;
            info!(path = %path.display(), "Configuration written");
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolate_core::config::load_config;
    use tempfile::tempdir;

    #[test]
    fn test_written_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("isolate.json");
        let config = IsolateConfig {
            teardown_retry_limit: 40,
            ..Default::default()
        };

        execute(&config, Some(&path)).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let err = execute(&IsolateConfig::default(), Some(&dir.path().join("isolate.ini"))).unwrap_err();
        assert!(matches!(err, CliError::Isolate(isolate_core::Error::Config(_))));
    }
}
