//! Engine configuration.
//!
//! This module provides configuration options for the migration engine,
//! covering scheduler limits, retry backoff, circuit breaker thresholds,
//! and checkpoint cadence and storage.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::breaker::BreakerSettings;
use crate::checkpoint::CheckpointTrigger;
use crate::retry::RetryPolicy;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Scheduler settings
    /// Maximum number of work items executing concurrently.
    pub concurrency: usize,
    /// Per-task execution timeout; `None` disables the timeout.
    pub task_timeout: Option<Duration>,
    /// Maximum attempts per work item (first run plus retries).
    pub max_attempts: u32,
    /// How many completed item records to retain in full detail.
    pub max_retained_completed: usize,
    /// Treat failed dependencies as satisfied instead of blocking
    /// dependents.
    pub skip_failed_dependencies: bool,

    // Retry settings
    /// Base delay before the first retry.
    pub retry_base_delay: Duration,
    /// Exponential multiplier applied per subsequent retry.
    pub retry_multiplier: f64,
    /// Upper bound on any single retry delay.
    pub retry_max_delay: Duration,
    /// Fraction of the delay added as uniform random jitter (0.0-1.0).
    pub retry_jitter_fraction: f64,

    // Circuit breaker settings
    /// Failures within the rolling window that open a breaker.
    pub breaker_failure_threshold: u32,
    /// Rolling window over which failures are counted.
    pub breaker_window: Duration,
    /// How long an open breaker waits before probing with a trial call.
    pub breaker_cooldown: Duration,

    // Checkpoint settings
    /// Save a checkpoint after this many completions.
    pub checkpoint_every_n: u64,
    /// Save a checkpoint after this much elapsed time.
    pub checkpoint_every: Duration,
    /// Directory for file-backed checkpoint storage.
    pub checkpoint_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let breaker = BreakerSettings::default();
        Self {
            // Scheduler defaults
            concurrency: 8,
            task_timeout: None,
            max_attempts: 3,
            max_retained_completed: 10_000,
            skip_failed_dependencies: false,

            // Retry defaults
            retry_base_delay: retry.base,
            retry_multiplier: retry.multiplier,
            retry_max_delay: retry.max_delay,
            retry_jitter_fraction: retry.jitter_fraction,

            // Breaker defaults
            breaker_failure_threshold: breaker.failure_threshold,
            breaker_window: breaker.window,
            breaker_cooldown: breaker.cooldown,

            // Checkpoint defaults
            checkpoint_every_n: 100,
            checkpoint_every: Duration::from_secs(60),
            checkpoint_dir: PathBuf::from("./checkpoints"),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATAPORTER_CONCURRENCY`: Maximum concurrent work items (default: 8)
    /// - `DATAPORTER_TASK_TIMEOUT_SECS`: Per-task timeout in seconds (default: none)
    /// - `DATAPORTER_MAX_ATTEMPTS`: Attempts per work item (default: 3)
    /// - `DATAPORTER_MAX_RETAINED_COMPLETED`: Completed records kept in detail (default: 10000)
    /// - `DATAPORTER_SKIP_FAILED_DEPS`: Treat failed dependencies as satisfied (default: false)
    /// - `DATAPORTER_RETRY_BASE_DELAY_MS`: Base retry delay in milliseconds (default: 500)
    /// - `DATAPORTER_RETRY_MULTIPLIER`: Exponential backoff multiplier (default: 2.0)
    /// - `DATAPORTER_RETRY_MAX_DELAY_SECS`: Retry delay cap in seconds (default: 60)
    /// - `DATAPORTER_RETRY_JITTER`: Jitter fraction 0.0-1.0 (default: 0.2)
    /// - `DATAPORTER_BREAKER_THRESHOLD`: Failures that open a breaker (default: 5)
    /// - `DATAPORTER_BREAKER_WINDOW_SECS`: Rolling failure window in seconds (default: 60)
    /// - `DATAPORTER_BREAKER_COOLDOWN_SECS`: Open-state cooldown in seconds (default: 30)
    /// - `DATAPORTER_CHECKPOINT_EVERY_N`: Completions per checkpoint (default: 100)
    /// - `DATAPORTER_CHECKPOINT_EVERY_SECS`: Seconds per checkpoint (default: 60)
    /// - `DATAPORTER_CHECKPOINT_DIR`: File store directory (default: ./checkpoints)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Scheduler settings
        if let Ok(val) = std::env::var("DATAPORTER_CONCURRENCY") {
            config.concurrency = parse_env_value(&val, "DATAPORTER_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("DATAPORTER_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DATAPORTER_TASK_TIMEOUT_SECS")?;
            config.task_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("DATAPORTER_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "DATAPORTER_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("DATAPORTER_MAX_RETAINED_COMPLETED") {
            config.max_retained_completed =
                parse_env_value(&val, "DATAPORTER_MAX_RETAINED_COMPLETED")?;
        }

        if let Ok(val) = std::env::var("DATAPORTER_SKIP_FAILED_DEPS") {
            config.skip_failed_dependencies = parse_env_bool(&val, "DATAPORTER_SKIP_FAILED_DEPS")?;
        }

        // Retry settings
        if let Ok(val) = std::env::var("DATAPORTER_RETRY_BASE_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "DATAPORTER_RETRY_BASE_DELAY_MS")?;
            config.retry_base_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("DATAPORTER_RETRY_MULTIPLIER") {
            config.retry_multiplier = parse_env_value(&val, "DATAPORTER_RETRY_MULTIPLIER")?;
        }

        if let Ok(val) = std::env::var("DATAPORTER_RETRY_MAX_DELAY_SECS") {
            let secs: u64 = parse_env_value(&val, "DATAPORTER_RETRY_MAX_DELAY_SECS")?;
            config.retry_max_delay = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("DATAPORTER_RETRY_JITTER") {
            config.retry_jitter_fraction = parse_env_value(&val, "DATAPORTER_RETRY_JITTER")?;
        }

        // Breaker settings
        if let Ok(val) = std::env::var("DATAPORTER_BREAKER_THRESHOLD") {
            config.breaker_failure_threshold = parse_env_value(&val, "DATAPORTER_BREAKER_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("DATAPORTER_BREAKER_WINDOW_SECS") {
            let secs: u64 = parse_env_value(&val, "DATAPORTER_BREAKER_WINDOW_SECS")?;
            config.breaker_window = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("DATAPORTER_BREAKER_COOLDOWN_SECS") {
            let secs: u64 = parse_env_value(&val, "DATAPORTER_BREAKER_COOLDOWN_SECS")?;
            config.breaker_cooldown = Duration::from_secs(secs);
        }

        // Checkpoint settings
        if let Ok(val) = std::env::var("DATAPORTER_CHECKPOINT_EVERY_N") {
            config.checkpoint_every_n = parse_env_value(&val, "DATAPORTER_CHECKPOINT_EVERY_N")?;
        }

        if let Ok(val) = std::env::var("DATAPORTER_CHECKPOINT_EVERY_SECS") {
            let secs: u64 = parse_env_value(&val, "DATAPORTER_CHECKPOINT_EVERY_SECS")?;
            config.checkpoint_every = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("DATAPORTER_CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Scheduler validation
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if let Some(timeout) = self.task_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::ValidationFailed(
                    "task_timeout must be greater than 0".to_string(),
                ));
            }
        }

        // Retry validation
        if self.retry_multiplier < 1.0 {
            return Err(ConfigError::ValidationFailed(
                "retry_multiplier must be at least 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_fraction) {
            return Err(ConfigError::ValidationFailed(
                "retry_jitter_fraction must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.retry_max_delay < self.retry_base_delay {
            return Err(ConfigError::ValidationFailed(
                "retry_max_delay cannot be smaller than retry_base_delay".to_string(),
            ));
        }

        // Breaker validation
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "breaker_failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.breaker_window.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "breaker_window must be greater than 0".to_string(),
            ));
        }

        if self.breaker_cooldown.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "breaker_cooldown must be greater than 0".to_string(),
            ));
        }

        // Checkpoint validation
        if self.checkpoint_every_n == 0 {
            return Err(ConfigError::ValidationFailed(
                "checkpoint_every_n must be greater than 0".to_string(),
            ));
        }

        if self.checkpoint_every.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "checkpoint_every must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: self.retry_base_delay,
            multiplier: self.retry_multiplier,
            max_delay: self.retry_max_delay,
            jitter_fraction: self.retry_jitter_fraction,
        }
    }

    /// The circuit breaker settings described by this configuration.
    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.breaker_failure_threshold,
            window: self.breaker_window,
            cooldown: self.breaker_cooldown,
        }
    }

    /// A checkpoint trigger with this configuration's cadence.
    pub fn checkpoint_trigger(&self) -> CheckpointTrigger {
        CheckpointTrigger::new(self.checkpoint_every_n, self.checkpoint_every)
    }

    /// Builder method to set scheduler concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Builder method to set attempts per work item.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set retained completed records.
    pub fn with_max_retained_completed(mut self, retained: usize) -> Self {
        self.max_retained_completed = retained;
        self
    }

    /// Builder method to skip failed dependencies.
    pub fn with_skip_failed_dependencies(mut self, skip: bool) -> Self {
        self.skip_failed_dependencies = skip;
        self
    }

    /// Builder method to set the base retry delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Builder method to set the retry multiplier.
    pub fn with_retry_multiplier(mut self, multiplier: f64) -> Self {
        self.retry_multiplier = multiplier;
        self
    }

    /// Builder method to set the retry delay cap.
    pub fn with_retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Builder method to set the retry jitter fraction.
    pub fn with_retry_jitter_fraction(mut self, fraction: f64) -> Self {
        self.retry_jitter_fraction = fraction;
        self
    }

    /// Builder method to set the breaker failure threshold.
    pub fn with_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Builder method to set the breaker failure window.
    pub fn with_breaker_window(mut self, window: Duration) -> Self {
        self.breaker_window = window;
        self
    }

    /// Builder method to set the breaker cooldown.
    pub fn with_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = cooldown;
        self
    }

    /// Builder method to set the checkpoint completion cadence.
    pub fn with_checkpoint_every_n(mut self, every_n: u64) -> Self {
        self.checkpoint_every_n = every_n;
        self
    }

    /// Builder method to set the checkpoint time cadence.
    pub fn with_checkpoint_every(mut self, every: Duration) -> Self {
        self.checkpoint_every = every;
        self
    }

    /// Builder method to set the checkpoint directory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_retained_completed, 10_000);
        assert!(!config.skip_failed_dependencies);
        assert_eq!(config.retry_base_delay, Duration::from_millis(500));
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.checkpoint_every_n, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_concurrency(16)
            .with_task_timeout(Duration::from_secs(300))
            .with_max_attempts(5)
            .with_skip_failed_dependencies(true)
            .with_retry_base_delay(Duration::from_millis(100))
            .with_retry_multiplier(3.0)
            .with_breaker_failure_threshold(10)
            .with_checkpoint_every_n(50)
            .with_checkpoint_dir("/tmp/cp");

        assert_eq!(config.concurrency, 16);
        assert_eq!(config.task_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.max_attempts, 5);
        assert!(config.skip_failed_dependencies);
        assert_eq!(config.retry_base_delay, Duration::from_millis(100));
        assert!((config.retry_multiplier - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.breaker_failure_threshold, 10);
        assert_eq!(config.checkpoint_every_n, 50);
        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/cp"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let result = EngineConfig::default().with_concurrency(0).validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("concurrency"));
    }

    #[test]
    fn test_validation_zero_attempts() {
        let result = EngineConfig::default().with_max_attempts(0).validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validation_multiplier_below_one() {
        let result = EngineConfig::default().with_retry_multiplier(0.5).validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("retry_multiplier"));
    }

    #[test]
    fn test_validation_jitter_out_of_range() {
        let result = EngineConfig::default()
            .with_retry_jitter_fraction(1.5)
            .validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("retry_jitter_fraction"));
    }

    #[test]
    fn test_validation_max_delay_below_base() {
        let result = EngineConfig::default()
            .with_retry_base_delay(Duration::from_secs(120))
            .validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("retry_max_delay"));
    }

    #[test]
    fn test_validation_zero_breaker_threshold() {
        let result = EngineConfig::default()
            .with_breaker_failure_threshold(0)
            .validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("breaker_failure_threshold"));
    }

    #[test]
    fn test_validation_zero_checkpoint_cadence() {
        let result = EngineConfig::default().with_checkpoint_every_n(0).validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("checkpoint_every_n"));
    }

    #[test]
    fn test_subsystem_conversions() {
        let config = EngineConfig::default()
            .with_retry_multiplier(4.0)
            .with_breaker_cooldown(Duration::from_secs(5));
        let policy = config.retry_policy();
        assert!((policy.multiplier - 4.0).abs() < f64::EPSILON);
        let settings = config.breaker_settings();
        assert_eq!(settings.cooldown, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(parse_env_bool("ON", "test").unwrap());
        assert!(!parse_env_bool("off", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }
}
