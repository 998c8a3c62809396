//! HTTP API server for live-offer checkout.
//!
//! Serves the synchronized stock view of live events and drives checkout
//! sessions, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use backend::{
    BackendError, ChangeFeed, HttpPaymentBackend, InMemoryOfferBackend, PaymentBackend,
    PgChangeFeed, PostgresOfferBackend, StockBackend,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/events/{event_id}/offers", get(routes::offers::list))
        .route("/sessions", post(routes::sessions::create))
        .route(
            "/sessions/{id}",
            get(routes::sessions::get).delete(routes::sessions::close),
        )
        .route("/sessions/{id}/purchase", post(routes::sessions::purchase))
        .route("/sessions/{id}/succeed", post(routes::sessions::succeed))
        .route("/sessions/{id}/fail", post(routes::sessions::fail))
        .route("/sessions/{id}/cancel", post(routes::sessions::cancel))
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

/// Errors raised while wiring the backends at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("PAYMENT_FUNCTIONS_URL must be set when DATABASE_URL is set")]
    MissingPaymentBackend,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Creates the application state from `config`.
///
/// With `DATABASE_URL` unset everything runs against one in-memory backend.
/// Otherwise offers and locks live in PostgreSQL and intents come from the
/// hosted payment function.
pub async fn create_state(config: &Config) -> Result<Arc<AppState>, StartupError> {
    if config.database_url.is_some() && config.payment_functions_url.is_none() {
        return Err(StartupError::MissingPaymentBackend);
    }
    let in_memory = InMemoryOfferBackend::new().with_lock_ttl(config.lock_ttl);

    let (stock, feed): (Arc<dyn StockBackend>, Arc<dyn ChangeFeed>) = match &config.database_url
    {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .map_err(BackendError::from)?;
            tracing::info!("using PostgreSQL offer store");
            let stock: Arc<dyn StockBackend> = Arc::new(PostgresOfferBackend::new(pool.clone()));
            let feed: Arc<dyn ChangeFeed> = Arc::new(PgChangeFeed::new(pool));
            (stock, feed)
        }
        None => {
            tracing::info!(
                lock_ttl_secs = config.lock_ttl.as_secs(),
                "using in-memory offer store"
            );
            let stock: Arc<dyn StockBackend> = Arc::new(in_memory.clone());
            let feed: Arc<dyn ChangeFeed> = Arc::new(in_memory.clone());
            (stock, feed)
        }
    };

    let payment: Arc<dyn PaymentBackend> = match &config.payment_functions_url {
        Some(url) => {
            let key = config.payment_functions_key.clone().unwrap_or_default();
            Arc::new(HttpPaymentBackend::new(url.as_str(), key))
        }
        None => Arc::new(in_memory),
    };

    let state = AppState::new(stock, payment, feed)
        .with_release_on_abort(config.release_on_abort)
        .with_idle_limits(config.session_idle, config.sync_idle);
    Ok(Arc::new(state))
}
