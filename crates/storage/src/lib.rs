//! Storage layer for the tag index.
//!
//! This crate provides:
//! - Ordered index key encoding and opaque resume pointers
//! - One redb environment per namespace, opened lazily by [`NamespaceRegistry`]
//! - Item and DISTKEY name shortening with first-writer-wins registration
//! - Range scans with pagination, a fetch budget and de-duplication
//! - Incremental index maintenance against per-entity ancestor records
//! - Lock-conflict retry with linear backoff

pub mod condition;
mod engine;
mod error;
pub mod fulltext;
mod indexes;
pub mod keys;
mod namespace;
pub mod pointer;
mod retry;
mod scan;
mod shortening;
mod store;
mod tables;

pub use condition::{Condition, ScanRange};
pub use engine::StorageEngine;
pub use error::{ErrorClass, Result, StoreError, classify};
pub use fulltext::{TermQuery, tokenize};
pub use indexes::{AncestorRecord, Delta, DeltaOutcome, DeltaScope, IndexDiffEngine};
pub use namespace::NamespaceRegistry;
pub use pointer::{PointerError, decode_pointer, encode_pointer};
pub use retry::{LinearBackoff, LinearBuilder, with_lock_retry};
pub use scan::{DedupCache, RangeQueryEngine, ScanPage, ScanRequest};
pub use shortening::{NameKind, ShorteningRegistry};
pub use store::{NamespaceStore, TableCursor};
pub use tables::{BytesTable, Tables};
