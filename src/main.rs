//! datapoint - Main entry point.
//!
//! Bootstraps the metadata store, reloads registered connections and serves
//! the HTTP API.

use datapoint::config::{Config, PoolOptions};
use datapoint::db::{
    ConnectionRegistry, DbPool, QueryExecutor, SqlConnectionStore, load_script, run_script,
};
use datapoint::transport::{AppState, HttpTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    init_tracing(&config);

    info!(
        metadata = %config.masked_metadata_url(),
        "Starting datapoint v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool_options = config.pool_options()?;

    // Metadata store: bootstrap before anything reads from it
    let metadata = DbPool::connect_url(&config.metadata_url, &PoolOptions::default()).await?;
    let script = load_script(config.migration.as_deref())?;
    run_script(&metadata, &script).await?;

    let store = Arc::new(SqlConnectionStore::new(metadata.clone()));
    let registry = Arc::new(ConnectionRegistry::new(store, pool_options));
    let loaded = registry.load().await?;
    info!(count = loaded, "Registered connections restored");

    let state = AppState::new(
        registry,
        QueryExecutor::with_timeout(config.query_timeout),
    );
    let transport = HttpTransport::new(
        state,
        &config.http_host,
        config.http_port,
        config.shutdown_timeout_duration(),
    );
    info!(
        transport = transport.name(),
        bind = %config.http_bind_addr(),
        "Serving API"
    );

    let result = transport.run().await;
    metadata.close().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
