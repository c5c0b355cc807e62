use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RETRY_INTERVAL_MS, DEFAULT_TARGET_KEY, DEFAULT_WORKER_NAME};

const DEFAULT_CONFIG_PATH: &str = "/etc/xen-balloon/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Tunables of the balloon driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalloonConfig {
    /// Delay between two runs of an unconverged balloon, in milliseconds.
    pub retry_interval_ms: u64,
    /// Scrub pages outside the directly addressable range before surrender.
    pub scrub_non_direct: bool,
    /// Store node watched for new targets.
    pub target_key: String,
    /// Name of the worker thread.
    pub worker_name: String,
}

impl Default for BalloonConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            scrub_non_direct: true,
            target_key: DEFAULT_TARGET_KEY.to_owned(),
            worker_name: DEFAULT_WORKER_NAME.to_owned(),
        }
    }
}

impl BalloonConfig {
    pub(crate) fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Splits `target_key` into the store directory and node name.
    pub(crate) fn target_node(&self) -> (&str, &str) {
        self.target_key
            .rsplit_once('/')
            .unwrap_or(("", self.target_key.as_str()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from the default path.
    pub fn load_default() -> Result<BalloonConfig, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads the configuration from the specified path.
    pub fn load_from_path(path: &str) -> Result<BalloonConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parses a configuration document.
    pub fn load_from_str(content: &str) -> Result<BalloonConfig, ConfigError> {
        let config: BalloonConfig = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = ConfigLoader::load_from_str("retry_interval_ms = 20\n").unwrap();
        assert_eq!(config.retry_interval(), Duration::from_millis(20));
        assert!(config.scrub_non_direct);
        assert_eq!(config.target_node(), ("memory", "target"));
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = ConfigLoader::load_from_str("retry_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ConfigLoader::load_from_path("/nonexistent/balloon.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
