//! Background sweeper for the Rollcall registration engine.
//!
//! Expires lapsed promotion offers and marks no-shows for ended events.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/rollcall cargo run --bin rollcall-sweeper
//! ```

use anyhow::Context;
use rollcall_core::environment::SystemClock;
use rollcall_postgres::{PgEventCatalog, PgOutboxPublisher, PgRegistrationStore};
use rollcall_runtime::metrics::MetricsServer;
use rollcall_runtime::sweeper::{DEFAULT_LOOKBACK, Sweeper};
use rollcall_runtime::{RegistrationEngine, RegistrationEnvironment};
use rollcall_service::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside development
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "rollcall=info,sqlx=warn".into()))
        .with(fmt::layer())
        .init();

    info!("Starting Rollcall sweeper");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        sweep_interval_secs = config.engine.sweep_interval_secs,
        promotion_window_hours = config.engine.promotion_window_hours,
        "Configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
        .connect(&config.postgres.url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let store = PgRegistrationStore::new(pool.clone());
    store.migrate().await.context("failed to run migrations")?;
    info!("Migrations applied");

    let _metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(config.metrics_addr()?);
        server.start().context("failed to start metrics server")?;
        Some(server)
    } else {
        None
    };

    let engine = RegistrationEngine::new(
        RegistrationEnvironment {
            store: Arc::new(store),
            catalog: Arc::new(PgEventCatalog::new(pool.clone())),
            publisher: Arc::new(PgOutboxPublisher::new(pool.clone())),
            clock: Arc::new(SystemClock),
        },
        config.engine_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(engine, config.sweep_interval())
        .with_lookback(config.sweep_lookback().unwrap_or(DEFAULT_LOOKBACK))
        .spawn(shutdown_rx);

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(config.shutdown_timeout(), sweeper).await {
        Ok(Ok(())) => info!("Sweeper drained"),
        Ok(Err(join_error)) => error!(error = %join_error, "Sweeper task failed"),
        Err(_) => warn!(
            timeout_secs = config.shutdown_timeout,
            "Sweeper did not stop within the shutdown timeout"
        ),
    }

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
