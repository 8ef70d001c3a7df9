//! Fan-out worker pool configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Maximum number of dispatch workers.
const MAX_WORKERS: usize = 256;

/// What happens when a fan-out job arrives at a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// The submitter waits for a free slot.
    #[default]
    Block,
    /// The job is dropped and counted as rejected.
    Reject,
}

/// Bounded dispatch pool configuration.
///
/// # Validation Rules
///
/// - `workers` must be 1-256
/// - `queue_capacity` and `max_attempts` must be > 0
/// - `request_timeout` must be non-zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DispatchConfig {
    /// Number of concurrent worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs buffered before the overflow policy applies.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Behavior on a full queue.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Timeout for a single shard call.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub request_timeout: Duration,
    /// Attempts per job on retryable transport failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay between attempts.
    #[serde(default = "default_retry_delay")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub retry_delay: Duration,
}

#[bon::bon]
impl DispatchConfig {
    /// Creates a new dispatch configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_workers())] workers: usize,
        #[builder(default = default_queue_capacity())] queue_capacity: usize,
        #[builder(default)] overflow: OverflowPolicy,
        #[builder(default = default_request_timeout())] request_timeout: Duration,
        #[builder(default = default_max_attempts())] max_attempts: u32,
        #[builder(default = default_retry_delay())] retry_delay: Duration,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { workers, queue_capacity, overflow, request_timeout, max_attempts, retry_delay };
        config.validate()?;
        Ok(config)
    }
}

impl DispatchConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::Validation {
                message: format!("workers must be 1-{MAX_WORKERS}, got {}", self.workers),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "queue_capacity must be > 0".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be > 0".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "request_timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
            request_timeout: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(100)
}
