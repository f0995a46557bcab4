//! Orchestration core configuration.
//!
//! `CoreConfig` gathers every tunable named by the recognized-configuration-keys
//! contract into one validated, serializable struct, with `development()`/
//! `production()`/`testing()` presets plus a builder for ad-hoc overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while constructing, validating, or (de)serializing a
/// [`CoreConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field value failed a validation rule.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Reading or writing the config file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file did not contain valid JSON for this shape.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Every tunable recognized by the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    /// Milliseconds of queued inactivity before an agent is marked starved.
    pub starvation_threshold_ms: u64,
    /// Number of recent scheduling decisions considered for fairness.
    pub fairness_window: usize,
    /// Additive scheduling-priority boost applied to starved agents.
    pub priority_boost_for_starved: i64,
    /// Whether the debug manager records anything at all.
    pub debug_enabled: bool,
    /// Whether the debug manager records message log entries.
    pub log_messages: bool,
    /// Whether the debug manager records routing latency entries.
    pub log_routing: bool,
    /// Whether the debug manager records agent-state snapshots.
    pub log_agent_state: bool,
    /// Whether the debug manager records workflow-state snapshots.
    pub log_workflow_state: bool,
    /// Ring-buffer capacity for each performance-monitor stream.
    pub max_history_size: usize,
    /// Default retry policy's max-retries.
    pub default_max_retries: u32,
    /// Default retry policy's per-attempt timeout, in milliseconds.
    pub default_timeout_ms: u64,
}

impl CoreConfig {
    /// A permissive configuration suited to local development: debug logging
    /// on, modest thresholds.
    #[must_use]
    pub fn development() -> Self {
        Self {
            starvation_threshold_ms: 5000,
            fairness_window: 100,
            priority_boost_for_starved: 10,
            debug_enabled: true,
            log_messages: true,
            log_routing: true,
            log_agent_state: true,
            log_workflow_state: true,
            max_history_size: 10_000,
            default_max_retries: 3,
            default_timeout_ms: 5000,
        }
    }

    /// A production-leaning configuration: debug manager off by default,
    /// larger history retention.
    #[must_use]
    pub fn production() -> Self {
        Self {
            starvation_threshold_ms: 5000,
            fairness_window: 200,
            priority_boost_for_starved: 10,
            debug_enabled: false,
            log_messages: false,
            log_routing: false,
            log_agent_state: false,
            log_workflow_state: false,
            max_history_size: 50_000,
            default_max_retries: 3,
            default_timeout_ms: 5000,
        }
    }

    /// A fast-failing configuration suited to automated tests: short
    /// starvation threshold, small history.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            starvation_threshold_ms: 200,
            fairness_window: 10,
            priority_boost_for_starved: 10,
            debug_enabled: true,
            log_messages: true,
            log_routing: true,
            log_agent_state: true,
            log_workflow_state: true,
            max_history_size: 100,
            default_max_retries: 2,
            default_timeout_ms: 500,
        }
    }

    /// Begin building a config from the development preset.
    #[must_use]
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// Cross-field validation beyond what individual fields enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.starvation_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "starvation_threshold_ms must be positive".into(),
            ));
        }
        if self.fairness_window == 0 {
            return Err(ConfigError::Invalid(
                "fairness_window must be positive".into(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(ConfigError::Invalid(
                "max_history_size must be positive".into(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be positive".into(),
            ));
        }
        if self.debug_enabled
            && !(self.log_messages || self.log_routing || self.log_agent_state || self.log_workflow_state)
        {
            return Err(ConfigError::Invalid(
                "debug_enabled requires at least one log_* stream enabled".into(),
            ));
        }
        Ok(())
    }

    /// Serialize to pretty JSON and write to `path`.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate a config previously written by [`Self::save_to_file`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Fluent builder over [`CoreConfig`], validating on [`Self::build`].
#[derive(Debug, Clone)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Start from the development preset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CoreConfig::development(),
        }
    }

    /// Override the starvation threshold.
    #[must_use]
    pub fn starvation_threshold_ms(mut self, value: u64) -> Self {
        self.config.starvation_threshold_ms = value;
        self
    }

    /// Override the fairness window.
    #[must_use]
    pub fn fairness_window(mut self, value: usize) -> Self {
        self.config.fairness_window = value;
        self
    }

    /// Override the starved-agent priority boost.
    #[must_use]
    pub fn priority_boost_for_starved(mut self, value: i64) -> Self {
        self.config.priority_boost_for_starved = value;
        self
    }

    /// Enable or disable the debug manager entirely.
    #[must_use]
    pub fn debug_enabled(mut self, value: bool) -> Self {
        self.config.debug_enabled = value;
        self
    }

    /// Override the performance-monitor ring-buffer size.
    #[must_use]
    pub fn max_history_size(mut self, value: usize) -> Self {
        self.config.max_history_size = value;
        self
    }

    /// Validate and produce the final config.
    pub fn build(self) -> Result<CoreConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_preset_validates() {
        CoreConfig::development().validate().unwrap();
    }

    #[test]
    fn production_preset_validates() {
        CoreConfig::production().validate().unwrap();
    }

    #[test]
    fn testing_preset_validates() {
        CoreConfig::testing().validate().unwrap();
    }

    #[test]
    fn builder_rejects_zero_starvation_threshold() {
        let result = CoreConfig::builder().starvation_threshold_ms(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn debug_enabled_requires_a_log_stream() {
        let mut config = CoreConfig::development();
        config.debug_enabled = true;
        config.log_messages = false;
        config.log_routing = false;
        config.log_agent_state = false;
        config.log_workflow_state = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = CoreConfig::testing();
        config.save_to_file(&path).unwrap();
        let loaded = CoreConfig::load_from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
