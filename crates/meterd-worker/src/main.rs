//! Meterd worker - standalone queue consumer.
//!
//! Wires the store, metering engine, broker, and dispatcher together, then
//! consumes until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meterd_engine::{MemoryCounterStore, MeteringEngine, RateLimiter};
use meterd_queue::{standard_bindings, Dispatcher, MemoryBroker, TracingAlertSink};
use meterd_store::RocksStore;

mod config;

use config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meterd=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting meterd worker");

    let config = WorkerConfig::from_env();
    tracing::info!(
        data_dir = %config.data_dir,
        prefetch = config.prefetch,
        rate_limit_per_minute = ?config.rate_limit.per_minute,
        rate_limit_per_day = ?config.rate_limit.per_day,
        "Worker configuration loaded"
    );

    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    let pricing = Arc::new(config.load_pricing()?);
    let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), config.rate_limit);
    let engine = Arc::new(MeteringEngine::new(store, pricing, limiter));

    let broker = Arc::new(MemoryBroker::new());
    let dispatcher = Dispatcher::new(broker, Arc::new(TracingAlertSink), config.prefetch);

    let running = dispatcher.start(standard_bindings(engine)).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received; stopping consumers");
    running.shutdown();
    tracing::info!("Worker shutdown complete");

    Ok(())
}
