//! Request forwarding to one upstream service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::Response;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{GatewayError, Result};

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub const X_GATEWAY: HeaderName = HeaderName::from_static("x-gateway");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The service a route is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Catalog,
    Payment,
    Cart,
}

impl Upstream {
    pub fn name(&self) -> &'static str {
        match self {
            Upstream::Catalog => "catalog",
            Upstream::Payment => "payment",
            Upstream::Cart => "cart",
        }
    }

    fn base_url<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            Upstream::Catalog => &config.catalog_url,
            Upstream::Payment => &config.payment_url,
            Upstream::Cart => &config.cart_url,
        }
    }
}

/// Shared gateway state: HTTP client, upstream addresses and the request
/// counter reported by `/metrics`.
#[derive(Clone)]
pub struct Proxy {
    client: reqwest::Client,
    config: Arc<Config>,
    requests: Arc<AtomicU64>,
}

impl Proxy {
    pub fn new(config: Config) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            requests: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Requests forwarded so far. Approximate under concurrency.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Forwards `request` to `upstream`, dropping the `/api` prefix.
    ///
    /// The upstream's response is returned as is, whatever its status.
    #[tracing::instrument(skip_all, fields(upstream = upstream.name(), method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(&self, upstream: Upstream, request: Request) -> Result<Response> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_requests_total", "upstream" => upstream.name()).increment(1);

        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let url = upstream_url(upstream.base_url(&self.config), request.uri());

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        headers.insert(X_GATEWAY, HeaderValue::from_static("gateway"));
        if let Some(ip) = client_ip.and_then(|ip| HeaderValue::from_str(&ip).ok()) {
            headers.insert(X_FORWARDED_FOR, ip);
        }
        let request_id = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(X_REQUEST_ID, value);
        }

        let upstream_response = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|source| GatewayError::Upstream {
                upstream: upstream.name(),
                source,
            })?;

        let status = upstream_response.status();
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        response_headers.remove(header::CONTENT_LENGTH);

        let bytes = upstream_response
            .bytes()
            .await
            .map_err(|source| GatewayError::Upstream {
                upstream: upstream.name(),
                source,
            })?;
        tracing::debug!(%request_id, status = status.as_u16(), "forwarded");

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn upstream_url(base: &str, uri: &axum::http::Uri) -> String {
    let path = uri.path();
    let path = path.strip_prefix("/api").unwrap_or(path);
    let mut url = format!("{}{}", base.trim_end_matches('/'), path);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_drops_api_prefix_and_keeps_query() {
        let uri: axum::http::Uri = "/api/v1/products?category=lamps&limit=5".parse().unwrap();
        assert_eq!(
            upstream_url("http://catalog:8081/", &uri),
            "http://catalog:8081/v1/products?category=lamps&limit=5"
        );

        let uri: axum::http::Uri = "/api/v1/baskets/u1".parse().unwrap();
        assert_eq!(
            upstream_url("http://cart:8083", &uri),
            "http://cart:8083/v1/baskets/u1"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::AUTHORIZATION));
    }
}
