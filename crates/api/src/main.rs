//! `shop` entry point: catalog, payment and cart servers in one process.

use api::config::Config;
use api::{Services, cart_router, catalog_router, payment_router};
use axum::Router;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve(name: &'static str, addr: String, app: Router, shutdown: watch::Receiver<bool>) {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    tracing::info!(service = name, %addr, "listening");

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::routes::metrics::describe();

    // 3. Wire stores, bus and services
    let services = Services::connect(&config)
        .await
        .expect("failed to initialize services");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    // 4. Consumer group members
    let cart_consumer = services.cart_consumer(&config);
    let rx = shutdown_rx.clone();
    tasks.spawn(async move {
        if let Err(e) = cart_consumer.run(rx).await {
            tracing::error!(error = %e, "cart consumer stopped");
        }
    });

    let catalog_consumer = services.catalog_consumer(&config);
    let rx = shutdown_rx.clone();
    tasks.spawn(async move {
        if let Err(e) = catalog_consumer.run(rx).await {
            tracing::error!(error = %e, "catalog consumer stopped");
        }
    });

    // 5. HTTP servers
    tasks.spawn(serve(
        "catalog",
        config.catalog_addr(),
        catalog_router(services.catalog.clone(), metrics_handle.clone()),
        shutdown_rx.clone(),
    ));
    tasks.spawn(serve(
        "payment",
        config.payment_addr(),
        payment_router(services.payments.clone(), metrics_handle.clone()),
        shutdown_rx.clone(),
    ));
    tasks.spawn(serve(
        "cart",
        config.cart_addr(),
        cart_router(services.carts.clone(), metrics_handle),
        shutdown_rx,
    ));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "task panicked");
        }
    }

    tracing::info!("shop shut down gracefully");
}
