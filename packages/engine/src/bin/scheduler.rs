//! Lifecycle scheduler binary: periodically sweeps expired incidents and
//! propagates the status change to the vector store.

use std::sync::Arc;

use anyhow::{Context, Result};
use incident_engine_core::domains::incidents::LifecycleScheduler;
use incident_engine_core::kernel::{scheduler::start_lifecycle_scheduler, EngineKernel};
use incident_engine_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,incident_engine_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting incident engine lifecycle scheduler");

    let config = Config::from_env().context("failed to load configuration")?;
    let kernel = EngineKernel::from_config(&config)
        .await
        .context("failed to build engine kernel")?;

    let lifecycle = Arc::new(LifecycleScheduler::new(
        Arc::clone(&kernel.incident_store),
        Arc::clone(&kernel.vector_store),
    ));

    let _scheduler = start_lifecycle_scheduler(lifecycle, config.scheduler_period)
        .await
        .context("failed to start lifecycle scheduler")?;

    tracing::info!(period_secs = config.scheduler_period.as_secs(), "lifecycle scheduler running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, stopping scheduler");

    Ok(())
}
