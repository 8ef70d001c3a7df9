//! Store configuration: environment location, scan budgets and lock retry.

use std::{path::PathBuf, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Store layer configuration.
///
/// # Validation Rules
///
/// - `fetch_limit`, `retry_count` and `term_max_length` must be > 0
/// - `entry_count_default` must be in `1..=entry_count_limit`
///
/// # Example
///
/// ```no_run
/// # use tagindex_types::config::StoreConfig;
/// # use std::time::Duration;
/// let config = StoreConfig::builder()
///     .fetch_limit(500)
///     .retry_wait(Duration::from_millis(20))
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Directory holding one `<namespace>.redb` file per tenant.
    ///
    /// When unset, namespace environments are kept in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Maximum cursor positions a single scan call may advance.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
    /// Attempts made on lock conflict before failing with `RetryExceeded`.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Base delay before the first retry.
    #[serde(default = "default_retry_wait")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub retry_wait: Duration,
    /// Delay added per further retry attempt.
    #[serde(default = "default_retry_increment")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub retry_increment: Duration,
    /// Page size used when a query does not set one.
    #[serde(default = "default_entry_count_default")]
    pub entry_count_default: u32,
    /// Largest page size a query may request.
    #[serde(default = "default_entry_count_limit")]
    pub entry_count_limit: u32,
    /// Full-text terms longer than this many bytes are truncated at a character boundary.
    #[serde(default = "default_term_max_length")]
    pub term_max_length: usize,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        data_dir: Option<PathBuf>,
        #[builder(default = default_fetch_limit())] fetch_limit: u32,
        #[builder(default = default_retry_count())] retry_count: u32,
        #[builder(default = default_retry_wait())] retry_wait: Duration,
        #[builder(default = default_retry_increment())] retry_increment: Duration,
        #[builder(default = default_entry_count_default())] entry_count_default: u32,
        #[builder(default = default_entry_count_limit())] entry_count_limit: u32,
        #[builder(default = default_term_max_length())] term_max_length: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            data_dir,
            fetch_limit,
            retry_count,
            retry_wait,
            retry_increment,
            entry_count_default,
            entry_count_limit,
            term_max_length,
        };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_limit == 0 {
            return Err(ConfigError::Validation { message: "fetch_limit must be > 0".to_string() });
        }
        if self.retry_count == 0 {
            return Err(ConfigError::Validation { message: "retry_count must be > 0".to_string() });
        }
        if self.term_max_length == 0 {
            return Err(ConfigError::Validation {
                message: "term_max_length must be > 0".to_string(),
            });
        }
        if self.entry_count_default == 0 || self.entry_count_default > self.entry_count_limit {
            return Err(ConfigError::Validation {
                message: format!(
                    "entry_count_default must be 1-{} (entry_count_limit), got {}",
                    self.entry_count_limit, self.entry_count_default
                ),
            });
        }
        Ok(())
    }

    /// Delay before retry `attempt` (zero-based): `retry_wait + attempt * retry_increment`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_wait + self.retry_increment.saturating_mul(attempt)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            fetch_limit: default_fetch_limit(),
            retry_count: default_retry_count(),
            retry_wait: default_retry_wait(),
            retry_increment: default_retry_increment(),
            entry_count_default: default_entry_count_default(),
            entry_count_limit: default_entry_count_limit(),
            term_max_length: default_term_max_length(),
        }
    }
}

fn default_fetch_limit() -> u32 {
    1000
}

fn default_retry_count() -> u32 {
    5
}

fn default_retry_wait() -> Duration {
    Duration::from_millis(50)
}

fn default_retry_increment() -> Duration {
    Duration::from_millis(50)
}

fn default_entry_count_default() -> u32 {
    100
}

fn default_entry_count_limit() -> u32 {
    1000
}

fn default_term_max_length() -> usize {
    128
}
