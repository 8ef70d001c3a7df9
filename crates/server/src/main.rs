//! Tag index node binary.
//!
//! # Usage
//!
//! ```bash
//! # Shard node with persistent storage
//! tagindex --listen 0.0.0.0:7700 --data /var/lib/tagindex
//!
//! # Configuration file plus environment overrides
//! TAGINDEX__STORE__FETCH_LIMIT=500 tagindex --config /etc/tagindex.toml
//!
//! # Check a configuration without starting
//! tagindex --config /etc/tagindex.toml --check-config
//! ```

use std::{io::IsTerminal, net::SocketAddr};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use snafu::ResultExt;
use tagindex_server::{
    AppState, Cli, Config, LogFormat, ServerError, app,
    error::{BindSnafu, ServeSnafu},
    shutdown,
};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    if cli.check_config {
        println!("{config:#?}");
        return Ok(());
    }

    init_logging(config.log_format);

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = ?config.store.data_dir,
        origin = config.origin.is_some(),
        "starting tagindex"
    );
    if config.store.data_dir.is_none() {
        tracing::warn!(
            "no data directory configured; namespace environments are in memory and \
             lost on shutdown. Set --data or TAGINDEX__STORE__DATA_DIR to persist them."
        );
    }
    if config.is_localhost_only() {
        tracing::warn!("listening on localhost only, remote shard calls will be refused");
    }

    if let Some(metrics_addr) = config.metrics_addr {
        init_metrics_exporter(metrics_addr)?;
    }

    let state = AppState::from_config(&config)?;
    let addr = config.listen_addr;
    let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;

    tracing::info!(%addr, "server ready, accepting connections");
    let served = axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context(ServeSnafu);

    state.shutdown().await;
    served?;
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Initializes the logging system.
///
/// `Auto` selects JSON when stdout is not a terminal. The filter comes from
/// `RUST_LOG`, defaulting to `info`.
fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stdout().is_terminal(),
    };

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
    }
}

/// Starts the Prometheus exporter serving `/metrics` on `addr`.
fn init_metrics_exporter(addr: SocketAddr) -> Result<(), ServerError> {
    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(&tagindex_router::metrics::LATENCY_BUCKETS)
        .map_err(|e| ServerError::Metrics { message: format!("histogram buckets: {e}") })?;

    builder.install().map_err(|e| ServerError::Metrics { message: e.to_string() })?;

    tracing::info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}
