//! HTTP API server for the order fulfillment saga.
//!
//! Exposes checkout, order lookup and history, cancellation, dead-letter
//! inspection and live notifications, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Collaborators, NotificationHub, Saga};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::orders::checkout))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/users/{user_id}/orders", get(routes::orders::history))
        .route("/dead-letters/{topic}", get(routes::dead_letters::list))
        .route(
            "/notifications/{user_id}",
            get(routes::notifications::stream),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates an application state where every collaborator lives in memory.
pub fn create_default_state(config: &Config) -> Arc<AppState> {
    let idempotency = InMemoryIdempotencyStore::with_config(config.idempotency_config());
    create_state(config, Arc::new(idempotency))
}

/// Creates an application state on top of the given idempotency store.
pub fn create_state(config: &Config, idempotency: Arc<dyn IdempotencyStore>) -> Arc<AppState> {
    let saga_config = config.saga_config();
    let notifications = NotificationHub::new(saga_config.notification_capacity);

    let collaborators = Collaborators {
        idempotency,
        ..Collaborators::in_memory(config.log_partitions, Arc::new(notifications.clone()))
    };

    Arc::new(AppState::new(
        Saga::new(collaborators, saga_config),
        notifications,
    ))
}
