//! Prometheus exposition for the service counters.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registers help text for the counters recorded by the services and the bus.
pub fn describe() {
    metrics::describe_counter!(
        "bus_records_published_total",
        "Records appended to the event bus"
    );
    metrics::describe_counter!(
        "bus_records_consumed_total",
        "Records handled and committed by a consumer group"
    );
    metrics::describe_counter!(
        "bus_handler_failures_total",
        "Handler errors; the record stays uncommitted"
    );
    metrics::describe_counter!(
        "bus_poison_records_total",
        "Undecodable records committed past"
    );
    metrics::describe_counter!(
        "bus_publish_failures_total",
        "Publishes that failed after every retry"
    );
    metrics::describe_counter!("cart_operations_total", "Cart mutations by operation");
    metrics::describe_counter!(
        "catalog_stock_updates_total",
        "Stock transactions by operation and outcome"
    );
    metrics::describe_counter!("payments_processed_total", "Payments by resulting status");
    metrics::describe_counter!(
        "payments_publish_failures_total",
        "Completed payments whose event could not be published"
    );
}

/// GET /metrics
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], handle.render())
}
