use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// GET /health
pub async fn check(service: &'static str) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service,
    })
}
