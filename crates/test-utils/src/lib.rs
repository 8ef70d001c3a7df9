//! Shared test utilities for tagindex crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`assert_eventually`] / [`poll_until`] - Poll a condition until it holds or times out
//! - [`test_store_config`] - Store configuration with fast retries
//! - [`test_dispatch_config`] - Small dispatch pool for tests
//! - [`strategies`] - Proptest generators for key components

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod assertions;
pub use assertions::{assert_eventually, poll_until};

mod config;
pub use config::{test_dispatch_config, test_store_config};

pub mod strategies;
