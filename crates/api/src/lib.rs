//! HTTP API server with observability for the stock reservation system.
//!
//! Provides cart, checkout, and payment-webhook endpoints over the
//! reservation engine, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use checkout::{FinalizationHandler, PriceListPricing, Reconciler, StoreSessionProvider};
use common::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use stock_store::StockStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
use routes::checkout::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: StockStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/skus", post(routes::skus::upsert::<S>))
        .route("/skus", get(routes::skus::list::<S>))
        .route("/cart", get(routes::cart::get::<S>))
        .route("/cart/items/{sku}", put(routes::cart::put_line::<S>))
        .route("/cart/items/{sku}", delete(routes::cart::delete_line::<S>))
        .route("/checkout", post(routes::checkout::checkout::<S>))
        .route("/webhooks/payment", post(routes::webhook::payment::<S>))
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

/// Creates the application state over the given store.
pub fn create_state<S: StockStore + Clone + 'static>(
    store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    let sessions = StoreSessionProvider::new(
        store.clone(),
        config.session_ttl(),
        Money::from_cents(config.shipping_cost_cents),
        config.tax_rate_bps,
    );
    let pricing = PriceListPricing::new();
    let reconciler = Reconciler::new(store.clone(), config.hold_ttl());
    let finalizer = FinalizationHandler::new(store.clone(), pricing.clone());

    Arc::new(AppState {
        store,
        sessions,
        pricing,
        reconciler,
        finalizer,
    })
}
