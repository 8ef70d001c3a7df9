//! Core types, errors and configuration for tagindex.
//!
//! This crate provides the foundational types shared by the storage, router
//! and server crates:
//! - Domain types for namespaces, index entries, queries and scan results
//! - The error taxonomy and machine-readable error codes
//! - Postcard codec helpers for stored values
//! - Validated configuration structs

pub mod codec;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ErrorCode, IndexError, Result};
pub use types::*;
