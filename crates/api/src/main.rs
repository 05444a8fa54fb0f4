//! API server entry point.

use std::error::Error;
use std::sync::Arc;

use api::{AppState, Config, LogFormat};
use inventory::{InMemoryNumberInventory, NumberInventory, PostgresNumberInventory};
use ledger::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the server over the given stores until a shutdown signal arrives.
async fn serve<I, S>(
    config: Config,
    inventory: Arc<I>,
    store: S,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>>
where
    I: NumberInventory + 'static,
    S: OrderStore + 'static,
{
    let state = Arc::new(AppState::new(inventory, store));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = state.spawn_workers(&config, shutdown_rx);

    let rearmed = state.coordinator.recover().await?;
    tracing::info!(rearmed, "pending orders recovered");

    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send_replace(true);
    for worker in workers {
        if let Err(error) = worker.await {
            tracing::warn!(%error, "background task ended abnormally");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the stores and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            let inventory =
                PostgresNumberInventory::with_reservation_ttl(pool.clone(), config.reservation_ttl());
            inventory.run_migrations().await?;
            tracing::info!("using PostgreSQL stores");
            serve(config, Arc::new(inventory), PostgresOrderStore::new(pool), metrics_handle).await?;
        }
        None => {
            let inventory = InMemoryNumberInventory::with_reservation_ttl(config.reservation_ttl());
            tracing::info!("DATABASE_URL not set, using in-memory stores");
            serve(config, Arc::new(inventory), InMemoryOrderStore::new(), metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
