//! Worker binary: spawns the parallel worker pools for both logical queues
//! (`cluster`, `severity`) and runs until terminated.

use std::sync::Arc;

use anyhow::{Context, Result};
use incident_engine_core::domains::incidents::{ClusteringUseCase, SeverityUseCase};
use incident_engine_core::jobs::{spawn_worker_pool, WorkerContext};
use incident_engine_core::kernel::EngineKernel;
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

    tracing::info!("starting incident engine worker");

    let config = Config::from_env().context("failed to load configuration")?;
    let kernel = EngineKernel::from_config(&config)
        .await
        .context("failed to build engine kernel")?;

    let clustering = Arc::new(ClusteringUseCase::new(
        Arc::clone(&kernel.embedder),
        Arc::clone(&kernel.vector_store),
        Arc::clone(&kernel.incident_store),
        Arc::clone(&kernel.arbiter),
    ));
    let severity = Arc::new(SeverityUseCase::new(Arc::clone(&kernel.incident_store)));

    let ctx = Arc::new(WorkerContext {
        job_store: Arc::clone(&kernel.job_store),
        job_queue: Arc::clone(&kernel.job_queue),
        clustering,
        severity,
        cluster_backoff: config.cluster_job_backoff,
        severity_backoff: config.severity_job_backoff,
        job_wall_clock_cap: config.job_wall_clock_cap,
        poll_interval: config.worker_poll_interval,
    });

    let mut handles = spawn_worker_pool(Arc::clone(&ctx), "cluster", config.cluster_worker_count);
    handles.extend(spawn_worker_pool(ctx, "severity", config.severity_worker_count));

    tracing::info!(
        cluster_workers = config.cluster_worker_count,
        severity_workers = config.severity_worker_count,
        "worker pools running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, stopping worker");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
