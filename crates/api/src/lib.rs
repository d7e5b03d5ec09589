//! HTTP surfaces for the storefront services.
//!
//! Each service gets its own router (catalog, payment, cart) with health,
//! Prometheus metrics, CORS and request tracing. [`Services`] wires the
//! service layer to its stores and to the shared event bus, and builds the
//! consumer group members that react to completed payments.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cart::{CartEventHandler, CartService, CartStore, InMemoryCartStore, RedisCartStore};
use catalog::{
    CatalogEventHandler, CatalogService, InMemoryProductStore, PostgresProductStore, ProductStore,
};
use event_bus::{Consumer, ConsumerConfig, EventBus, InMemoryEventBus, Producer, ProducerConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use payment::{InMemoryPaymentStore, PaymentService, PaymentStore, PostgresPaymentStore};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::StartupError;

/// Event bus shared by the producer and every consumer of the process.
pub type SharedBus = Arc<dyn EventBus>;

pub type CatalogApi = CatalogService<Arc<dyn ProductStore>>;
pub type PaymentApi = PaymentService<Arc<dyn PaymentStore>, SharedBus>;
pub type CartApi = CartService<Arc<dyn CartStore>>;

pub type CartConsumer = Consumer<SharedBus, CartEventHandler<Arc<dyn CartStore>>>;
pub type CatalogConsumer = Consumer<SharedBus, CatalogEventHandler<Arc<dyn ProductStore>>>;

/// The three services sharing one event bus.
#[derive(Clone)]
pub struct Services {
    pub bus: SharedBus,
    pub catalog: Arc<CatalogApi>,
    pub payments: Arc<PaymentApi>,
    pub carts: Arc<CartApi>,
}

impl Services {
    /// In-memory stores and bus throughout.
    pub fn in_memory(config: &Config) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryEventBus::with_partitions(config.bus_partitions)),
            Arc::new(InMemoryProductStore::new()),
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(InMemoryCartStore::new()),
        )
    }

    /// Picks each backend from the configuration: Kafka when `KAFKA_BROKERS`
    /// is set, Redis baskets when `REDIS_URL` is set, PostgreSQL products and
    /// payments when `DATABASE_URL` is set. Anything unset stays in memory.
    pub async fn connect(config: &Config) -> Result<Self, StartupError> {
        let bus = connect_bus(config)?;

        let carts: Arc<dyn CartStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisCartStore::connect(url).await?),
            None => Arc::new(InMemoryCartStore::new()),
        };

        let (products, payments): (Arc<dyn ProductStore>, Arc<dyn PaymentStore>) =
            match config.database_url.as_deref() {
                Some(url) => {
                    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
                    let products = PostgresProductStore::new(pool.clone());
                    // Applies every migration, payments included.
                    products.run_migrations().await?;
                    tracing::info!("using PostgreSQL stores");
                    (Arc::new(products), Arc::new(PostgresPaymentStore::new(pool)))
                }
                None => (
                    Arc::new(InMemoryProductStore::new()),
                    Arc::new(InMemoryPaymentStore::new()),
                ),
            };

        Ok(Self::with_stores(config, bus, products, payments, carts))
    }

    pub fn with_stores(
        config: &Config,
        bus: SharedBus,
        products: Arc<dyn ProductStore>,
        payments: Arc<dyn PaymentStore>,
        carts: Arc<dyn CartStore>,
    ) -> Self {
        let producer = Producer::with_config(
            bus.clone(),
            ProducerConfig {
                acks: config.producer_acks,
                ..ProducerConfig::default()
            },
        );
        let payments = PaymentService::new(payments, producer)
            .with_processing_delay(config.payment_processing_delay);

        Self {
            catalog: Arc::new(CatalogService::new(products)),
            payments: Arc::new(payments),
            carts: Arc::new(CartService::new(carts)),
            bus,
        }
    }

    /// Member of the cart group: clears the buyer's basket on payment.
    pub fn cart_consumer(&self, config: &Config) -> CartConsumer {
        Consumer::new(
            self.bus.clone(),
            CartEventHandler::new(self.carts.clone()),
            ConsumerConfig::new(config.cart_consumer_group.clone()),
        )
    }

    /// Member of the catalog group: decrements stock for the paid order.
    pub fn catalog_consumer(&self, config: &Config) -> CatalogConsumer {
        Consumer::new(
            self.bus.clone(),
            CatalogEventHandler::new(self.catalog.clone()),
            ConsumerConfig::new(config.catalog_consumer_group.clone()),
        )
    }
}

fn connect_bus(config: &Config) -> Result<SharedBus, StartupError> {
    match config.kafka_brokers.as_deref() {
        Some(brokers) => kafka_bus(brokers, config),
        None => Ok(Arc::new(InMemoryEventBus::with_partitions(
            config.bus_partitions,
        ))),
    }
}

#[cfg(feature = "kafka")]
fn kafka_bus(brokers: &str, config: &Config) -> Result<SharedBus, StartupError> {
    let mut kafka = event_bus::KafkaConfig::new(brokers);
    kafka.partitions = config.bus_partitions;
    tracing::info!(brokers, "using Kafka event bus");
    Ok(Arc::new(event_bus::KafkaEventBus::new(kafka)?))
}

#[cfg(not(feature = "kafka"))]
fn kafka_bus(_brokers: &str, _config: &Config) -> Result<SharedBus, StartupError> {
    Err(StartupError::KafkaDisabled)
}

/// GET/POST/PUT/DELETE/OPTIONS from any origin.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn with_common_routes(
    router: Router,
    service: &'static str,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    router
        .route("/health", get(move || routes::health::check(service)))
        .merge(metrics_router)
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

/// Catalog service router.
pub fn catalog_router(catalog: Arc<CatalogApi>, metrics_handle: PrometheusHandle) -> Router {
    let router = Router::new()
        .route(
            "/v1/products",
            get(routes::catalog::list).post(routes::catalog::create),
        )
        .route("/v1/products/{id}", get(routes::catalog::get))
        .route(
            "/v1/products/{id}/stock",
            post(routes::catalog::update_stock),
        )
        .with_state(catalog);
    with_common_routes(router, "catalog", metrics_handle)
}

/// Payment service router.
pub fn payment_router(payments: Arc<PaymentApi>, metrics_handle: PrometheusHandle) -> Router {
    let router = Router::new()
        .route("/v1/payments", post(routes::payments::process))
        .route("/v1/payments/{id}", get(routes::payments::get))
        .route("/v1/payments/{id}/refund", post(routes::payments::refund))
        .with_state(payments);
    with_common_routes(router, "payment", metrics_handle)
}

/// Cart service router.
pub fn cart_router(carts: Arc<CartApi>, metrics_handle: PrometheusHandle) -> Router {
    let router = Router::new()
        .route("/v1/baskets/{user_id}", get(routes::baskets::get))
        .route("/v1/baskets/add", post(routes::baskets::add))
        .route("/v1/baskets/remove", post(routes::baskets::remove))
        .route("/v1/baskets/update", post(routes::baskets::update))
        .route("/v1/baskets/clear", post(routes::baskets::clear))
        .with_state(carts);
    with_common_routes(router, "cart", metrics_handle)
}
