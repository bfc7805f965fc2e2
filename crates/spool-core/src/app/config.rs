use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::processor::ProcessorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    pub processor: ProcessorSettings,
    /// Queue name -> settings.
    pub queues: BTreeMap<String, QueueConfig>,
}

impl SpoolConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

/// Processor configuration (parallelism, poll cadence, auto-heartbeat).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub parallelism: usize,
    pub poll_interval_ms: u64,
    /// Unset leaves heartbeats to the handler.
    pub heartbeat_interval_ms: Option<u64>,
}

impl ProcessorSettings {
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: self.heartbeat_interval_ms.map(Duration::from_millis),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            parallelism: 1,
            poll_interval_ms: 1000,
            heartbeat_interval_ms: None,
        }
    }
}

/// Per-queue settings. `max_retries` and `dead_letter_queue` go together.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub visibility_secs: u64,
    pub delay_secs: u64,
    pub max_retries: Option<u32>,
    /// Name of another queue in the same config.
    pub dead_letter_queue: Option<String>,
}

impl QueueConfig {
    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_secs: 30,
            delay_secs: 0,
            max_retries: None,
            dead_letter_queue: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = SpoolConfig::default();
        assert_eq!(config.processor.parallelism, 1);
        assert_eq!(config.processor.poll_interval_ms, 1000);
        assert_eq!(config.processor.heartbeat_interval_ms, None);
        assert!(config.queues.is_empty());
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            [processor]
            parallelism = 4
            heartbeat_interval_ms = 10000

            [queues.deploy]
            visibility_secs = 60
            max_retries = 5
            dead_letter_queue = "deploy-dead"

            [queues.deploy-dead]
        "#;
        let config = SpoolConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.processor.parallelism, 4);
        assert_eq!(config.processor.poll_interval_ms, 1000);

        let processor = config.processor.processor_config();
        assert_eq!(processor.poll_interval, Duration::from_secs(1));
        assert_eq!(processor.heartbeat_interval, Some(Duration::from_secs(10)));

        let deploy = &config.queues["deploy"];
        assert_eq!(deploy.visibility(), Duration::from_secs(60));
        assert_eq!(deploy.delay(), Duration::ZERO);
        assert_eq!(deploy.max_retries, Some(5));
        assert_eq!(deploy.dead_letter_queue.as_deref(), Some("deploy-dead"));

        assert_eq!(config.queues["deploy-dead"], QueueConfig::default());
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config = SpoolConfig::from_toml_str("").unwrap();
        assert_eq!(config.processor.parallelism, 1);
        assert!(config.queues.is_empty());
    }

    #[test]
    fn toml_parsing_rejects_wrong_types() {
        let err = SpoolConfig::from_toml_str("[processor]\nparallelism = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SpoolConfig::load("/definitely/not/here/spool.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
