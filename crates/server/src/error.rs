//! Server startup and runtime errors.

use std::net::SocketAddr;

use snafu::Snafu;
use tagindex_types::IndexError;

/// Top-level error of the server binary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerError {
    /// The configuration file or environment could not be read.
    #[snafu(display("failed to load configuration: {source}"))]
    Load {
        /// Underlying loader error.
        source: ::config::ConfigError,
    },

    /// A configuration value is out of range.
    #[snafu(display("{source}"))]
    Invalid {
        /// Validation failure.
        source: tagindex_types::config::ConfigError,
    },

    /// The listen address could not be bound.
    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[snafu(display("server error: {source}"))]
    Serve {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The Prometheus exporter could not be installed.
    #[snafu(display("failed to install Prometheus exporter: {message}"))]
    Metrics {
        /// Exporter error description.
        message: String,
    },

    /// The origin-side indexing stack could not be built.
    #[snafu(display("failed to start origin indexer: {source}"))]
    Origin {
        /// Underlying index error.
        source: IndexError,
    },
}
