//! Test configuration helpers.
//!
//! Provides configurations for tests, centralizing magic values that would
//! otherwise be scattered across test modules.

use std::time::Duration;

use tagindex_types::config::{DispatchConfig, StoreConfig};

/// Returns a store configuration suitable for tests.
///
/// In-memory environments with fast retries:
/// - `retry_wait` / `retry_increment`: 1ms
/// - every other value at its default
#[must_use]
pub fn test_store_config() -> StoreConfig {
    StoreConfig {
        retry_wait: Duration::from_millis(1),
        retry_increment: Duration::from_millis(1),
        ..StoreConfig::default()
    }
}

/// Returns a dispatch configuration suitable for tests.
///
/// - `workers`: 2
/// - `request_timeout`: 2s
/// - `retry_delay`: 5ms
#[must_use]
pub fn test_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        workers: 2,
        request_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(5),
        ..DispatchConfig::default()
    }
}
