//! Test harness with testcontainers for integration testing.
//!
//! A single Postgres container with the `pgvector` extension is started
//! once and reused across every integration test in this crate, with
//! migrations applied once on first use.

use anyhow::{Context, Result};
use incident_engine_core::kernel::incident_store_pg::PgIncidentStore;
use incident_engine_core::kernel::vector_store_pg::PgVectorStore;
use incident_engine_core::jobs::queue::PgJobQueue;
use sqlx::PgPool;
use std::sync::Arc;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::OnceCell;

struct SharedTestInfra {
    db_url: String,
    // Keeps the container alive for the entire test run.
    _postgres: ContainerAsync<GenericImage>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = GenericImage::new("pgvector/pgvector", "pg16")
            .with_wait_for(testcontainers::core::WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_exposed_port(testcontainers::core::ContainerPort::Tcp(5432))
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_DB", "postgres")
            .start()
            .await
            .context("failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("failed to init test infra") })
            .await
    }
}

/// Fresh `PgPool` plus the Postgres-backed store implementations, all
/// pointed at the shared container.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub incident_store: Arc<PgIncidentStore>,
    pub vector_store: Arc<PgVectorStore>,
    pub job_queue: Arc<PgJobQueue>,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("failed to connect to test database")?;

        Ok(Self {
            incident_store: Arc::new(PgIncidentStore::new(db_pool.clone())),
            vector_store: Arc::new(PgVectorStore::new(db_pool.clone())),
            job_queue: Arc::new(PgJobQueue::new(db_pool.clone(), 3, 3)),
            db_pool,
        })
    }

    /// Truncates every engine-owned table so tests don't see each other's
    /// fixtures. Safe to call at the start of every test since the
    /// container (and its schema) is shared.
    pub async fn reset(&self) {
        sqlx::query(
            "TRUNCATE TABLE jobs, complaint_vectors, incident_memberships, incidents, category_configs, complaints RESTART IDENTITY CASCADE",
        )
        .execute(&self.db_pool)
        .await
        .expect("failed to reset test database");
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        let harness = Self::new().await.expect("failed to create test harness");
        harness.reset().await;
        harness
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
