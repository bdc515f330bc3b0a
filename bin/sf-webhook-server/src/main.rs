//! Storefront Webhook Server
//!
//! Runs the webhook dispatch subsystem:
//! - Admin API: events, jobs, subscriptions, deliveries
//! - Delivery workers (Redis or in-process queue)
//! - Health and Prometheus metrics
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SF_CONFIG` | - | Path to a TOML config file |
//! | `SF_PORT` | `8080` | HTTP API port |
//! | `SF_DATABASE_URL` | - | PostgreSQL URL; in-memory stores when unset |
//! | `SF_QUEUE_BACKEND` | `auto` | `auto`, `redis` or `memory` |
//! | `SF_REDIS_URL` | - | Redis URL for the durable queue |
//! | `SF_LOG_FORMAT` | `text` | `json` for structured log lines |
//! | `RUST_LOG` | `info` | Log level |
//!
//! Every other `SF_*` override is documented in `sf-config`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sf_config::AppConfig;
use sf_delivery::{DeliveryConfig, DeliveryExecutor};
use sf_dispatch::{ServiceConfig, WebhookService};
use sf_events::{InMemoryOrderStatusStore, OrderStatusStore};
use sf_queue::create_queue_backend;
use sf_store::{
    InMemoryOutcomeRepository, InMemorySubscriptionRepository, OutcomeRepository,
    PostgresOrderStatusStore, PostgresOutcomeRepository, PostgresSubscriptionRepository,
    SubscriptionRepository,
};

/// Storefront Webhook Server
#[derive(Parser, Debug)]
#[command(name = "sf-webhook-server")]
#[command(about = "Storefront webhook dispatch and delivery server")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "SF_CONFIG")]
    config: Option<PathBuf>,
}

struct Stores {
    subscriptions: Arc<dyn SubscriptionRepository>,
    outcomes: Arc<dyn OutcomeRepository>,
    orders: Arc<dyn OrderStatusStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    info!("Starting Storefront Webhook Server");

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    info!(
        environment = ?config.environment,
        backend = ?config.queue.backend,
        max_concurrent = config.queue.max_concurrent,
        max_retries = config.queue.max_retries,
        "Configuration loaded"
    );

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    // 1. Stores
    let stores = build_stores(&config).await?;

    // 2. Delivery executor and queue backend
    let executor = DeliveryExecutor::new(
        DeliveryConfig {
            timeout: config.delivery.timeout(),
            user_agent: config.delivery.user_agent.clone(),
        },
        stores.outcomes.clone(),
    )
    .context("building HTTP client")?;
    let queue = create_queue_backend(&config.queue, Arc::new(executor))
        .await
        .context("starting queue backend")?;

    // 3. Service
    let service = Arc::new(WebhookService::new(
        ServiceConfig::from(&config),
        stores.subscriptions,
        stores.outcomes,
        stores.orders,
        queue,
    ));
    info!(backend = service.backend_name(), "Webhook service ready");

    // 4. HTTP API
    let app = sf_api::create_router(service.clone())
        .merge(metrics_router(prometheus))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP API")?;
    info!("Shutdown signal received, draining webhook queue...");

    // 5. Drain
    match service.close().await {
        Ok(summary) if summary.timed_out => {
            error!(dropped_jobs = summary.dropped_jobs, "Queue drain timed out")
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to close webhook service"),
    }

    info!("Storefront Webhook Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("SF_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_stores(config: &AppConfig) -> Result<Stores> {
    let Some(url) = config.database.url.as_deref() else {
        info!("No database URL configured, using in-memory stores");
        return Ok(Stores {
            subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
            outcomes: Arc::new(InMemoryOutcomeRepository::new()),
            orders: Arc::new(InMemoryOrderStatusStore::new()),
        });
    };

    info!(max_connections = config.database.max_connections, "Connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("connecting to PostgreSQL")?;

    let subscriptions = PostgresSubscriptionRepository::new(pool.clone());
    subscriptions.init_schema().await?;
    let outcomes = PostgresOutcomeRepository::new(pool.clone());
    outcomes.init_schema().await?;

    Ok(Stores {
        subscriptions: Arc::new(subscriptions),
        outcomes: Arc::new(outcomes),
        orders: Arc::new(PostgresOrderStatusStore::new(pool)),
    })
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
