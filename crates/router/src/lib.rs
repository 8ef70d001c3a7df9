//! Shard routing for the tag index.
//!
//! This crate provides:
//! - A consistent hash ring per tenant and index kind
//! - [`ShardRouter`]: record assignment, write fan-out and query routing
//! - A bounded dispatch pool delivering fan-out calls with retries
//! - The shard wire protocol and its HTTP and in-process transports
//! - [`ShardNode`]: the shard-side service applying writes and running scans
//! - [`EntityIndexer`]: origin-side index maintenance from entity mutations

mod dispatch;
mod indexer;
pub mod metrics;
pub mod protocol;
mod ring;
mod service;
mod shard_router;
mod transport;

pub use dispatch::{DispatchJob, Dispatcher};
pub use indexer::{EntityIndexer, IndexPolicy, ItemPolicy};
pub use protocol::{ShardMethod, ShardParams, ShardRequest, ShardResponse, WriteBody};
pub use ring::HashRing;
pub use service::ShardNode;
pub use shard_router::{ShardRouter, WriteSet, assignment_key};
pub use transport::{HttpTransport, LocalTransport, ShardTransport};
