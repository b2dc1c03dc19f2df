// EngineKernel - explicit process-wide state
//
// Replaces the "ambient global singleton" pattern (module-level embedding
// model / vector client / severity calculator) with a struct constructed
// once at startup and passed into worker and scheduler factories. Holds a
// `PgPool` plus the capability interfaces the use cases depend on.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::jobs::queue::{JobQueue, JobStore, PgJobQueue};
use crate::kernel::embedding_client::OpenAiEmbeddingClient;
use crate::kernel::incident_store_pg::PgIncidentStore;
use crate::kernel::llm_arbiter::ClaudeArbiter;
use crate::kernel::traits::{Arbiter, Embedder, IncidentStore, VectorStore};
use crate::kernel::vector_store_pg::PgVectorStore;

#[derive(Clone)]
pub struct EngineKernel {
    pub db_pool: PgPool,
    pub embedder: Arc<dyn Embedder>,
    pub arbiter: Arc<dyn Arbiter>,
    pub vector_store: Arc<dyn VectorStore>,
    pub incident_store: Arc<dyn IncidentStore>,
    /// Enqueue side of the job bus, handed to the use cases that dispatch
    /// follow-up jobs (the clustering use case's caller enqueues `Cluster`;
    /// the worker runtime enqueues the `Severity` follow-up itself).
    pub job_queue: Arc<dyn JobQueue>,
    /// Claim/ack side of the job bus, used only by the worker runtime.
    pub job_store: Arc<dyn JobStore>,
}

impl EngineKernel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        embedder: Arc<dyn Embedder>,
        arbiter: Arc<dyn Arbiter>,
        vector_store: Arc<dyn VectorStore>,
        incident_store: Arc<dyn IncidentStore>,
        job_queue: Arc<dyn JobQueue>,
        job_store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            db_pool,
            embedder,
            arbiter,
            vector_store,
            incident_store,
            job_queue,
            job_store,
        }
    }

    /// Wires the real, Postgres/OpenAI/Anthropic-backed kernel from
    /// configuration. Connects the database pool and constructs every
    /// capability implementation exactly once; the resulting kernel is
    /// cloned (cheaply, behind `Arc`s) into each worker.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.db_pool_max_connections)
            .connect(&config.database_url)
            .await?;

        let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbeddingClient::new(
            config.embedding_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
            config.embed_call_timeout,
        ));

        let arbiter: Arc<dyn Arbiter> = Arc::new(ClaudeArbiter::new(
            config.anthropic_api_key.clone(),
            config.arbiter_model.clone(),
        ));

        let vector_store: Arc<dyn VectorStore> = Arc::new(PgVectorStore::new(db_pool.clone()));
        let incident_store: Arc<dyn IncidentStore> =
            Arc::new(PgIncidentStore::new(db_pool.clone()));
        let job_queue_impl = Arc::new(PgJobQueue::new(
            db_pool.clone(),
            config.cluster_job_max_retries,
            config.severity_job_max_retries,
        ));
        let job_queue: Arc<dyn JobQueue> = job_queue_impl.clone();
        let job_store: Arc<dyn JobStore> = job_queue_impl;

        Ok(Self::new(
            db_pool,
            embedder,
            arbiter,
            vector_store,
            incident_store,
            job_queue,
            job_store,
        ))
    }
}

/// Per-call deadlines, suggested defaults from the concurrency model.
#[derive(Debug, Clone, Copy)]
pub struct CallDeadlines {
    pub embed: Duration,
    pub vector_store: Duration,
    pub llm: Duration,
}

impl From<&Config> for CallDeadlines {
    fn from(config: &Config) -> Self {
        Self {
            embed: config.embed_call_timeout,
            vector_store: config.vector_store_call_timeout,
            llm: config.llm_call_timeout,
        }
    }
}
