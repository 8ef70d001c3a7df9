//! Tag index node.
//!
//! Serves the shard protocol over HTTP for the namespaces stored on this node
//! and, when configured, accepts entity mutation notifications and routed
//! queries as the origin of a sharded deployment.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod routes;
pub mod shutdown;

pub use config::{Cli, Config, LogFormat, OriginConfig};
pub use error::ServerError;
pub use routes::{AppState, app};
