//! Gateway endpoints: its own health and metrics plus the forwarded routes.

use std::time::Instant;

use axum::Json;
use axum::extract::{Request, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::GatewayState;
use crate::error::Result;
use crate::proxy::Upstream;

/// Envelope for the gateway's own answers.
#[derive(Debug, Serialize)]
pub struct GatewayResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MetricsData {
    pub uptime: String,
    pub uptime_seconds: u64,
    pub requests: u64,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
pub async fn health() -> Json<GatewayResponse<HealthData>> {
    Json(GatewayResponse {
        success: true,
        message: Some("API Gateway is healthy".to_string()),
        data: HealthData {
            service: "gateway",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        },
    })
}

/// GET /metrics: uptime and the number of forwarded requests.
pub async fn metrics(State(state): State<GatewayState>) -> Json<GatewayResponse<MetricsData>> {
    let uptime = Instant::now().duration_since(state.started_at);
    Json(GatewayResponse {
        success: true,
        message: None,
        data: MetricsData {
            uptime: format!("{uptime:?}"),
            uptime_seconds: uptime.as_secs(),
            requests: state.proxy.request_count(),
            timestamp: Utc::now(),
        },
    })
}

pub async fn catalog(State(state): State<GatewayState>, request: Request) -> Result<Response> {
    state.proxy.forward(Upstream::Catalog, request).await
}

pub async fn payment(State(state): State<GatewayState>, request: Request) -> Result<Response> {
    state.proxy.forward(Upstream::Payment, request).await
}

pub async fn cart(State(state): State<GatewayState>, request: Request) -> Result<Response> {
    state.proxy.forward(Upstream::Cart, request).await
}
