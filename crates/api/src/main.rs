//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use idempotency::{IdempotencyStore, InMemoryIdempotencyStore, PostgresIdempotencyStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn idempotency_store(config: &Config) -> Arc<dyn IdempotencyStore> {
    let Some(url) = &config.database_url else {
        tracing::info!("using in-memory idempotency store");
        return Arc::new(InMemoryIdempotencyStore::with_config(
            config.idempotency_config(),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let store = PostgresIdempotencyStore::new(pool, config.idempotency_config());
    store
        .run_migrations()
        .await
        .expect("failed to run idempotency migrations");

    tracing::info!("using PostgreSQL idempotency store");
    Arc::new(store)
}

/// Periodically drops idempotency records past their retention.
fn spawn_purge(
    store: Arc<dyn IdempotencyStore>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "purged expired idempotency records"),
                    Err(e) => tracing::warn!(error = %e, "idempotency purge failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Build the saga on the configured idempotency store
    let idempotency = idempotency_store(&config).await;
    let state = api::create_state(&config, idempotency.clone());

    // 4. Publish anything committed but unpublished, resume pending orders
    match state.saga.recover().await {
        Ok(report) => tracing::info!(?report, "recovery complete"),
        Err(e) => tracing::error!(error = %e, "recovery failed"),
    }

    // 5. Start consumer workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = state.saga.spawn_workers(shutdown_rx.clone());
    workers.push(spawn_purge(idempotency, shutdown_rx));

    // 6. Start server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, partitions = config.log_partitions, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop the workers
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "worker task did not stop cleanly");
        }
    }

    tracing::info!("server shut down gracefully");
}
