//! HTTP API server for checkout and payment settlement.
//!
//! Provides the cart, checkout, order and provider-notification endpoints,
//! with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use settlement::{
    BalanceGateway, ExchangeRates, GatewayError, GatewayRegistry, SettlementEngine,
    SslcommerzGateway, StripeGateway,
};
use store::CommerceStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CommerceStore> {
    pub engine: SettlementEngine<S>,
}

impl<S: CommerceStore> AppState<S> {
    pub fn new(store: S, gateways: GatewayRegistry) -> Self {
        Self {
            engine: SettlementEngine::new(store, gateways),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CommerceStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/cart", get(routes::cart::get::<S>))
        .route("/cart/add", post(routes::cart::add::<S>))
        .route("/cart/remove", post(routes::cart::remove::<S>))
        .route("/cart/items/{id}", patch(routes::cart::update_quantity::<S>))
        .route("/checkout", post(routes::checkout::create::<S>))
        .route("/payments/init", post(routes::checkout::create::<S>))
        .route("/payments/notify", post(routes::payments::notify::<S>))
        .route(
            "/payments/notify/{method}",
            post(routes::payments::notify_method::<S>),
        )
        .route("/payments/ipn", post(routes::payments::ipn::<S>))
        .route("/payments/ipn/", post(routes::payments::ipn::<S>))
        .route(
            "/payments/stripe-webhook",
            post(routes::payments::stripe_webhook::<S>),
        )
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
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

/// Builds the gateway registry from configuration.
///
/// The balance gateway is always available. External gateways are only
/// registered when their credentials are configured.
pub fn build_gateways(config: &Config) -> Result<GatewayRegistry, GatewayError> {
    let client = settlement::gateway::http_client(config.gateway_timeout)?;
    let exchange = Arc::new(ExchangeRates::new(
        client.clone(),
        config.exchange_rate_config(),
    ));

    let mut registry = GatewayRegistry::new().with(BalanceGateway::new());

    if let Some(hosted) = config.hosted_redirect_config() {
        registry.register(Arc::new(SslcommerzGateway::new(
            hosted,
            client.clone(),
            exchange.clone(),
        )));
    }
    if let Some(intent) = config.payment_intent_config() {
        registry.register(Arc::new(StripeGateway::new(intent, client, exchange)));
    }

    Ok(registry)
}
