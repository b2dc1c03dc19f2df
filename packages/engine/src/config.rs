use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
///
/// Mirrors the inputs the core needs at startup: database connection,
/// embedding provider credentials and the fixed vector dimension `d`,
/// LLM arbiter credentials, the lifecycle scheduler period, and the
/// per-job-kind retry/backoff policy.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub embedding_api_key: String,
    pub embedding_model: String,
    /// Fixed dimension `d` of the embedding space. Every stored and
    /// queried vector must have exactly this many components.
    pub embedding_dimension: usize,

    pub anthropic_api_key: String,
    pub arbiter_model: String,

    /// How often the lifecycle scheduler sweeps for expired incidents.
    pub scheduler_period: Duration,

    pub cluster_job_max_retries: i32,
    pub cluster_job_backoff: Duration,
    pub severity_job_max_retries: i32,
    pub severity_job_backoff: Duration,

    pub embed_call_timeout: Duration,
    pub vector_store_call_timeout: Duration,
    pub llm_call_timeout: Duration,
    pub job_wall_clock_cap: Duration,

    /// Max connections in the shared Postgres pool (incident store, vector
    /// store, and job queue all share one pool).
    pub db_pool_max_connections: u32,
    /// Parallel workers polling the `cluster` logical queue.
    pub cluster_worker_count: usize,
    /// Parallel workers polling the `severity` logical queue.
    pub severity_worker_count: usize,
    /// How long an idle worker sleeps between empty claim polls.
    pub worker_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            embedding_api_key: env::var("EMBEDDING_API_KEY")
                .context("EMBEDDING_API_KEY must be set")?,
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", 1536)?,

            anthropic_api_key: env::var("ANTHROPIC_API_KEY")
                .context("ANTHROPIC_API_KEY must be set")?,
            arbiter_model: env::var("ARBITER_MODEL")
                .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string()),

            scheduler_period: Duration::from_secs(env_parse("SCHEDULER_PERIOD_SECS", 1800)?),

            cluster_job_max_retries: env_parse("CLUSTER_JOB_MAX_RETRIES", 3)?,
            cluster_job_backoff: Duration::from_secs(env_parse("CLUSTER_JOB_BACKOFF_SECS", 10)?),
            severity_job_max_retries: env_parse("SEVERITY_JOB_MAX_RETRIES", 3)?,
            severity_job_backoff: Duration::from_secs(env_parse(
                "SEVERITY_JOB_BACKOFF_SECS",
                5,
            )?),

            embed_call_timeout: Duration::from_secs(env_parse("EMBED_TIMEOUT_SECS", 5)?),
            vector_store_call_timeout: Duration::from_secs(env_parse(
                "VECTOR_STORE_TIMEOUT_SECS",
                3,
            )?),
            llm_call_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 10)?),
            job_wall_clock_cap: Duration::from_secs(env_parse("JOB_WALL_CLOCK_CAP_SECS", 30)?),

            db_pool_max_connections: env_parse("DB_POOL_MAX_CONNECTIONS", 20)?,
            cluster_worker_count: env_parse("CLUSTER_WORKER_COUNT", 4)?,
            severity_worker_count: env_parse("SEVERITY_WORKER_COUNT", 2)?,
            worker_poll_interval: Duration::from_millis(env_parse(
                "WORKER_POLL_INTERVAL_MS",
                500,
            )?),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}
