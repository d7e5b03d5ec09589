//! Gateway configuration loaded from environment variables.

use std::time::Duration;

/// Upper bound on one upstream round trip.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads `HOST`, `GATEWAY_PORT` (default `8080`), `CATALOG_SERVICE_URL`,
/// `PAYMENT_SERVICE_URL`, `CART_SERVICE_URL` and `RUST_LOG`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub catalog_url: String,
    pub payment_url: String,
    pub cart_url: String,
    pub upstream_timeout: Duration,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("GATEWAY_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            catalog_url: var("CATALOG_SERVICE_URL").unwrap_or(defaults.catalog_url),
            payment_url: var("PAYMENT_SERVICE_URL").unwrap_or(defaults.payment_url),
            cart_url: var("CART_SERVICE_URL").unwrap_or(defaults.cart_url),
            upstream_timeout: defaults.upstream_timeout,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            catalog_url: "http://localhost:8081".to_string(),
            payment_url: "http://localhost:8082".to_string(),
            cart_url: "http://localhost:8083".to_string(),
            upstream_timeout: UPSTREAM_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}
