//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use event_bus::Acks;

/// Settings for the `shop` process.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `CATALOG_PORT`, `PAYMENT_PORT`, `CART_PORT`: listen ports
///   (defaults `8081`, `8082`, `8083`)
/// - `DATABASE_URL`: when set, catalog and payments use PostgreSQL
/// - `REDIS_URL`: when set, baskets live in Redis
/// - `KAFKA_BROKERS`: when set, events go through Kafka instead of the
///   in-process bus
/// - `BUS_PARTITIONS`: partitions per topic (default `3`)
/// - `PRODUCER_ACKS`: `0`, `1` or `all` (default `all`)
/// - `CART_CONSUMER_GROUP`, `CATALOG_CONSUMER_GROUP`: consumer group ids
/// - `PAYMENT_PROCESSING_DELAY_MS`: simulated gateway latency (default `100`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub catalog_port: u16,
    pub payment_port: u16,
    pub cart_port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub kafka_brokers: Option<String>,
    pub bus_partitions: u32,
    pub producer_acks: Acks,
    pub cart_consumer_group: String,
    pub catalog_consumer_group: String,
    pub payment_processing_delay: Duration,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            catalog_port: parse(var("CATALOG_PORT")).unwrap_or(defaults.catalog_port),
            payment_port: parse(var("PAYMENT_PORT")).unwrap_or(defaults.payment_port),
            cart_port: parse(var("CART_PORT")).unwrap_or(defaults.cart_port),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            kafka_brokers: var("KAFKA_BROKERS"),
            bus_partitions: parse(var("BUS_PARTITIONS"))
                .filter(|p: &u32| *p > 0)
                .unwrap_or(defaults.bus_partitions),
            producer_acks: parse(var("PRODUCER_ACKS")).unwrap_or(defaults.producer_acks),
            cart_consumer_group: var("CART_CONSUMER_GROUP")
                .unwrap_or(defaults.cart_consumer_group),
            catalog_consumer_group: var("CATALOG_CONSUMER_GROUP")
                .unwrap_or(defaults.catalog_consumer_group),
            payment_processing_delay: parse(var("PAYMENT_PROCESSING_DELAY_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_processing_delay),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    pub fn catalog_addr(&self) -> String {
        format!("{}:{}", self.host, self.catalog_port)
    }

    pub fn payment_addr(&self) -> String {
        format!("{}:{}", self.host, self.payment_port)
    }

    pub fn cart_addr(&self) -> String {
        format!("{}:{}", self.host, self.cart_port)
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            catalog_port: 8081,
            payment_port: 8082,
            cart_port: 8083,
            database_url: None,
            redis_url: None,
            kafka_brokers: None,
            bus_partitions: 3,
            producer_acks: Acks::All,
            cart_consumer_group: "cart-service".to_string(),
            catalog_consumer_group: "catalog-service".to_string(),
            payment_processing_delay: payment::DEFAULT_PROCESSING_DELAY,
            log_level: "info".to_string(),
        }
    }
}
