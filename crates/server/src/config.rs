//! Server configuration.
//!
//! Values are layered, later sources winning:
//!
//! 1. A TOML file (`--config`, or `tagindex.toml` in the working directory if present)
//! 2. `TAGINDEX__`-prefixed environment variables, `__` separating nested keys
//!    (e.g. `TAGINDEX__STORE__FETCH_LIMIT=500`)
//! 3. Command-line flags
//!
//! ```toml
//! listen_addr = "0.0.0.0:7700"
//!
//! [store]
//! data_dir = "/var/lib/tagindex"
//! retry_wait = "50ms"
//!
//! [origin.sharding.default]
//! index_nodes = ["http://idx-0:7700", "http://idx-1:7700"]
//! fulltext_nodes = ["http://ft-0:7700"]
//! manifest_node = "http://mf-0:7700"
//!
//! [origin.policy.items.title]
//! value_type = "text"
//! ```

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tagindex_router::IndexPolicy;
use tagindex_types::config::{ConfigError, DispatchConfig, ShardingConfig, StoreConfig};

use crate::error::{InvalidSnafu, LoadSnafu, ServerError};

/// Environment variable prefix for configuration keys.
pub const ENV_PREFIX: &str = "TAGINDEX";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON when stdout is not a terminal, text otherwise.
    #[default]
    Auto,
    /// Human-readable text.
    Text,
    /// One JSON object per event.
    Json,
}

/// Command-line arguments.
#[derive(Debug, Default, Parser)]
#[command(name = "tagindex", version, about = "Sharded tag/document index node")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, short = 'c', env = "TAGINDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to serve the shard protocol on.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Directory for namespace environments. In-memory when unset.
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Address to expose Prometheus metrics on.
    #[arg(long)]
    pub metrics: Option<SocketAddr>,

    /// Log output format.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Validate the configuration, print it and exit.
    #[arg(long)]
    pub check_config: bool,
}

/// Origin-side indexing: entity mutations are turned into shard writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Shard topology per tenant.
    #[serde(default)]
    pub sharding: ShardingConfig,
    /// Fan-out worker pool.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Indexed items.
    #[serde(default)]
    pub policy: IndexPolicy,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP endpoint listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Prometheus endpoint address; disabled when unset.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Local shard storage.
    #[serde(default)]
    pub store: StoreConfig,
    /// Origin-side indexing; this node only serves shard calls when unset.
    #[serde(default)]
    pub origin: Option<OriginConfig>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7700))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: None,
            log_format: LogFormat::default(),
            store: StoreConfig::default(),
            origin: None,
        }
    }
}

impl Config {
    /// Loads the file and environment layers, applies CLI overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Load`] if a source cannot be read or deserialized,
    /// and [`ServerError::Invalid`] if a value is out of range.
    pub fn load(cli: &Cli) -> Result<Self, ServerError> {
        Self::load_with_env(cli, None)
    }

    /// Like [`Config::load`], reading environment variables from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(
        cli: &Cli,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self, ServerError> {
        let builder = ::config::Config::builder();
        let builder = match &cli.config {
            Some(path) => builder.add_source(::config::File::from(path.as_path())),
            None => builder.add_source(::config::File::with_name("tagindex").required(false)),
        };
        let builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut config: Config =
            builder.build().context(LoadSnafu)?.try_deserialize().context(LoadSnafu)?;
        config.apply_cli(cli);
        config.validate().context(InvalidSnafu)?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = cli.listen {
            self.listen_addr = listen;
        }
        if let Some(data) = &cli.data {
            self.store.data_dir = Some(data.clone());
        }
        if let Some(metrics) = cli.metrics {
            self.metrics_addr = Some(metrics);
        }
        if let Some(format) = cli.log_format {
            self.log_format = format;
        }
    }

    /// Validates every nested section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        if let Some(origin) = &self.origin {
            origin.sharding.validate()?;
            origin.dispatch.validate()?;
            if origin.policy.items.is_empty() {
                return Err(ConfigError::Validation {
                    message: "origin.policy declares no indexed items".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether the listener only accepts local connections.
    #[must_use]
    pub fn is_localhost_only(&self) -> bool {
        self.listen_addr.ip().is_loopback()
    }
}
