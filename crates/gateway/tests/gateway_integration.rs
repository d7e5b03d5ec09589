//! Gateway forwarding against a live upstream on an ephemeral port.

use std::net::SocketAddr;

use axum::Json;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::routing::{get, post};
use gateway::{Config, GatewayState, create_app};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Upstream that answers with what it received.
async fn echo(headers: HeaderMap, uri: Uri, body: Bytes) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "path": uri.path(),
        "query": uri.query(),
        "body": String::from_utf8_lossy(&body),
        "x_gateway": header("x-gateway"),
        "x_forwarded_for": header("x-forwarded-for"),
        "x_request_id": header("x-request-id"),
        "authorization": header("authorization"),
    }))
}

async fn missing() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "error": "Product prod_x not found"})),
    )
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/v1/products", get(echo))
        .route("/v1/products/prod_x", get(missing))
        .route("/v1/products/{id}", get(echo))
        .route("/v1/payments", post(echo))
        .route("/v1/baskets/{user_id}", get(echo))
        .route("/v1/baskets/add", post(echo));
    format!("http://{}", spawn(app).await)
}

/// An address nothing listens on.
async fn dead_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn spawn_gateway(config: Config) -> String {
    let state = GatewayState::new(config).unwrap();
    format!("http://{}", spawn(create_app(state)).await)
}

fn config_for(upstream: &str) -> Config {
    Config {
        catalog_url: upstream.to_string(),
        payment_url: upstream.to_string(),
        cart_url: upstream.to_string(),
        ..Config::default()
    }
}

#[tokio::test]
async fn forwards_path_query_and_injects_headers() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(config_for(&upstream)).await;

    let response = reqwest::Client::new()
        .get(format!("{gateway}/api/v1/products?category=lamps&limit=5"))
        .header("authorization", "Bearer token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["path"], "/v1/products");
    assert_eq!(echoed["query"], "category=lamps&limit=5");
    assert_eq!(echoed["x_gateway"], "gateway");
    assert_eq!(echoed["x_forwarded_for"], "127.0.0.1");
    assert_eq!(echoed["authorization"], "Bearer token");

    let request_id = echoed["x_request_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn request_ids_are_unique_per_request() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(config_for(&upstream)).await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let echoed: Value = client
            .get(format!("{gateway}/api/v1/baskets/u1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(echoed["path"], "/v1/baskets/u1");
        ids.push(echoed["x_request_id"].as_str().unwrap().to_string());
    }
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn forwards_post_body() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(config_for(&upstream)).await;

    let body = json!({"user_id": "u1", "product_id": "p1", "quantity": 2});
    let echoed: Value = reqwest::Client::new()
        .post(format!("{gateway}/api/v1/baskets/add"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(echoed["path"], "/v1/baskets/add");
    let forwarded: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
    assert_eq!(forwarded, body);
}

#[tokio::test]
async fn upstream_errors_pass_through_unchanged() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(config_for(&upstream)).await;

    let response = reqwest::Client::new()
        .get(format!("{gateway}/api/v1/products/prod_x"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Product prod_x not found");
}

#[tokio::test]
async fn unreachable_upstream_is_503() {
    let gateway = spawn_gateway(config_for(&dead_upstream().await)).await;

    let response = reqwest::Client::new()
        .post(format!("{gateway}/api/v1/payments"))
        .json(&json!({"order_id": "order_1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"success": false, "error": "Service unavailable"}));
}

#[tokio::test]
async fn unrouted_requests_are_not_forwarded() {
    let state = GatewayState::new(config_for(&dead_upstream().await)).unwrap();
    let app = create_app(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Only GET is routed for a basket id.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/baskets/clear")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(state.proxy.request_count(), 0);
}

#[tokio::test]
async fn health_and_metrics() {
    let upstream = spawn_upstream().await;
    let state = GatewayState::new(config_for(&upstream)).unwrap();
    let app = create_app(state.clone());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);

    for id in ["p1", "p2", "p3"] {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/products/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["requests"], 3);
    assert!(json["data"]["timestamp"].is_string());
}
