//! Core Settings
//!
//! TOML-backed settings for the operation manager and its default retry policy.
//!
//! ```toml
//! history_limit = 50
//! event_capacity = 128
//!
//! [retry]
//! preset = "aggressive"
//! max_attempts = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryConfiguration;

/// Settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown retry preset: {0}")]
    UnknownPreset(String),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for an `OperationManager`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Terminal operations kept for observers before pruning
    pub history_limit: usize,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
    /// Retry policy used by `execute_with_default_retry`
    pub retry: RetrySettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            event_capacity: 256,
            retry: RetrySettings::default(),
        }
    }
}

impl CoreConfig {
    /// Parse settings from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check limits and resolve the retry section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        self.retry.to_configuration().map(|_| ())
    }
}

/// Retry section of the settings file
///
/// Starts from `preset` (or the default preset) and overrides any field
/// that is set explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub preset: Option<String>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_min: Option<f64>,
    pub jitter_max: Option<f64>,
}

impl RetrySettings {
    /// Build the validated retry policy these settings describe
    pub fn to_configuration(&self) -> Result<RetryConfiguration, ConfigError> {
        let base = match &self.preset {
            Some(name) => RetryConfiguration::preset(name)
                .ok_or_else(|| ConfigError::UnknownPreset(name.clone()))?,
            None => RetryConfiguration::default(),
        };

        let (jitter_min, jitter_max) = base.jitter_range();

        RetryConfiguration::new(
            self.max_attempts.unwrap_or(base.max_attempts()),
            self.initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.initial_delay()),
            self.max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.max_delay()),
            self.backoff_multiplier.unwrap_or(base.backoff_multiplier()),
            (
                self.jitter_min.unwrap_or(jitter_min),
                self.jitter_max.unwrap_or(jitter_max),
            ),
        )
    }
}
