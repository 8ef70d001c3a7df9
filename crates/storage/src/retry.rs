//! Lock-conflict retry with linear backoff.
//!
//! Store operations run through [`with_lock_retry`]: lock conflicts are retried
//! with `retry_wait + attempt * retry_increment` delays up to `retry_count`
//! attempts, then surface as `RetryExceeded`. Input errors return immediately,
//! and environment failures return immediately and are logged as critical.

use std::{cell::Cell, time::Duration};

use backon::{BackoffBuilder, BlockingRetryable};
use tagindex_types::{IndexError, NamespaceId, config::StoreConfig};
use tracing::{error, warn};

use crate::error::{ErrorClass, StoreError};

/// Linearly increasing delays: `wait`, `wait + increment`, `wait + 2 * increment`, ...
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    wait: Duration,
    increment: Duration,
    attempt: u32,
    max_retries: u32,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let delay = self.wait + self.increment.saturating_mul(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

/// Builder for [`LinearBackoff`].
#[derive(Debug, Clone, Copy)]
pub struct LinearBuilder {
    wait: Duration,
    increment: Duration,
    max_retries: u32,
}

impl LinearBuilder {
    /// Builds from store configuration: `retry_count` total attempts.
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            wait: config.retry_wait,
            increment: config.retry_increment,
            max_retries: config.retry_count.saturating_sub(1),
        }
    }
}

impl BackoffBuilder for LinearBuilder {
    type Backoff = LinearBackoff;

    fn build(self) -> Self::Backoff {
        LinearBackoff {
            wait: self.wait,
            increment: self.increment,
            attempt: 0,
            max_retries: self.max_retries,
        }
    }
}

/// Runs `op`, retrying lock conflicts with linear backoff.
///
/// # Errors
///
/// - [`IndexError::RetryExceeded`] when every attempt hit a lock conflict
/// - The converted store error for input, corruption and environment failures
pub fn with_lock_retry<T>(
    namespace: &NamespaceId,
    config: &StoreConfig,
    operation: &'static str,
    op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, IndexError> {
    let retries = Cell::new(0u32);
    let result = op
        .retry(LinearBuilder::from_config(config))
        .sleep(std::thread::sleep)
        .when(StoreError::is_lock_conflict)
        .notify(|err: &StoreError, dur: Duration| {
            retries.set(retries.get() + 1);
            warn!(
                namespace = %namespace,
                operation,
                attempt = retries.get(),
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "lock conflict, retrying"
            );
        })
        .call();

    result.map_err(|err| match err.class() {
        ErrorClass::LockConflict => IndexError::RetryExceeded {
            namespace: namespace.clone(),
            attempts: retries.get() + 1,
            message: err.to_string(),
        },
        ErrorClass::Environment => {
            error!(namespace = %namespace, operation, error = %err, "critical store failure");
            err.into_index_error(namespace)
        },
        ErrorClass::InvalidInput => err.into_index_error(namespace),
    })
}
