//! Stateless HTTP gateway.
//!
//! Maps the public `/api/v1/...` routes onto the catalog, payment and cart
//! services, one upstream per route and no retries. Responses from the
//! upstream pass through unchanged; an unreachable upstream becomes a 503.

pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;

use std::time::Instant;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use proxy::{Proxy, Upstream};

#[derive(Clone)]
pub struct GatewayState {
    pub proxy: Proxy,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: Config) -> std::result::Result<Self, reqwest::Error> {
        Ok(Self {
            proxy: Proxy::new(config)?,
            started_at: Instant::now(),
        })
    }
}

/// Creates the gateway router.
pub fn create_app(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/api/v1/products", get(routes::catalog))
        .route("/api/v1/products/{id}", get(routes::catalog))
        .route("/api/v1/payments", post(routes::payment))
        .route("/api/v1/payments/{id}", get(routes::payment))
        .route("/api/v1/baskets/{user_id}", get(routes::cart))
        .route("/api/v1/baskets/add", post(routes::cart))
        .route("/api/v1/baskets/remove", post(routes::cart))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
