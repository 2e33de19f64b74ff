use actix::prelude::*;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod api;
mod config;
mod domain;
mod gateway;
mod messaging;
mod metrics;
mod models;
mod reconciliation;
mod store;
mod utils;

use actors::{CoordinatorActor, GetHandles, Services, Shutdown};
use config::Config;
use domain::purchase::PurchaseIntentHandler;
use gateway::HttpGateway;
use messaging::RedpandaClient;
use reconciliation::{ConfirmationProcessor, PendingSweep};
use store::PgStore;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ticket_settlement=debug")),
        )
        .init();

    tracing::info!("🚀 Starting ticket settlement service");

    let config = Config::from_env()?;

    // === 1. Postgres ===
    tracing::info!("Connecting to Postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to Postgres")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    store.ensure_schema().await?;

    // === 2. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 3. Outbound clients (each behind a circuit breaker) ===
    let redpanda = Arc::new(RedpandaClient::new(&config.broker)?);
    let gateway = Arc::new(HttpGateway::new(&config.gateway.base_url, config.gateway.timeout)?);

    // === 4. Reconciliation ===
    let processor = Arc::new(
        ConfirmationProcessor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            metrics.clone(),
            config.broker.max_delivery_attempts,
        )
        .with_notifier(redpanda.clone()),
    );

    let sweep = Arc::new(PendingSweep::new(
        store.clone(),
        store.clone(),
        metrics.clone(),
        chrono::Duration::from_std(config.settlement.pending_timeout)?,
        config.settlement.sweep_batch_size,
    ));

    // === 5. Actors ===
    tracing::info!("Starting coordinator actor");
    let coordinator = CoordinatorActor::new(Services {
        pool,
        broker: config.broker.clone(),
        processor,
        sweep,
        sweep_interval: config.settlement.sweep_interval,
        metrics: metrics.clone(),
        breakers: vec![gateway.circuit_breaker(), redpanda.circuit_breaker()],
    })
    .start();

    let handles = coordinator
        .send(GetHandles)
        .await?
        .context("Coordinator did not start its child actors")?;

    // === 6. HTTP ===
    let purchases = Arc::new(PurchaseIntentHandler::new(
        store.clone(),
        store.clone(),
        store,
        gateway,
        config.settlement.currency.clone(),
        metrics.clone(),
    ));

    let server = api::start_http_server(purchases, metrics, handles, config.http_port);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    coordinator.send(Shutdown).await?;
    tracing::info!("👋 Ticket settlement service stopped");

    Ok(())
}
