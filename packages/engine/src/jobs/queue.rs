//! The durable task queue: two logical queues, `cluster` and `severity`,
//! each with per-job retries and fixed backoff. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so a pool of parallel workers never claims the
//! same job twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::EngineResult;
use crate::jobs::model::EngineJob;

/// Enqueues a job onto its logical queue. Implemented by the Postgres
/// queue in production and a spy in tests (see `kernel::test_dependencies`).
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: EngineJob) -> EngineResult<()>;
}

/// A job claimed by a worker, ready to execute.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: EngineJob,
    /// 1-based attempt number (first attempt is 1, first retry is 2, ...).
    pub attempt: i32,
    pub max_attempts: i32,
}

/// Claim/ack side of the queue, used by the worker pool. Split from
/// `JobQueue` because use cases only ever enqueue (the cluster-job
/// success path dispatches a follow-up severity job), while only the
/// worker runtime claims and acknowledges.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claims up to `limit` ready jobs from `queue_name` for `worker_id`.
    /// "Ready" means `status = 'pending' AND next_run_at <= now()`.
    async fn claim_ready(
        &self,
        queue_name: &str,
        worker_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<ClaimedJob>>;

    async fn mark_succeeded(&self, job_id: Uuid) -> EngineResult<()>;

    /// Marks a job failed. If `retryable` and attempts remain, reschedules
    /// it `backoff` from now; otherwise marks it dead-lettered.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retryable: bool,
        backoff: std::time::Duration,
    ) -> EngineResult<()>;
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    attempt: i32,
    max_attempts: i32,
}

fn decode_payload(job_type: &str, payload: serde_json::Value) -> EngineResult<EngineJob> {
    match job_type {
        "cluster" => {
            let job: crate::jobs::model::ClusterJob = serde_json::from_value(payload)
                .map_err(|e| crate::errors::EngineError::PermanentExternal(format!("malformed cluster job payload: {e}")))?;
            Ok(EngineJob::Cluster(job))
        }
        "recompute_severity" => {
            let job: crate::jobs::model::SeverityJob = serde_json::from_value(payload)
                .map_err(|e| crate::errors::EngineError::PermanentExternal(format!("malformed severity job payload: {e}")))?;
            Ok(EngineJob::Severity(job))
        }
        other => Err(crate::errors::EngineError::PermanentExternal(format!(
            "unknown job type: {other}"
        ))),
    }
}

/// Postgres-backed queue and store, the durable backing for both logical
/// queues. One `jobs` table, discriminated by `queue_name`/`job_type`.
pub struct PgJobQueue {
    pool: PgPool,
    cluster_max_attempts: i32,
    severity_max_attempts: i32,
}

impl PgJobQueue {
    /// `cluster_max_attempts`/`severity_max_attempts` come from
    /// `Config::cluster_job_max_retries`/`severity_job_max_retries`, so an
    /// operator's env-var override actually reaches the jobs this queue
    /// enqueues instead of a hardcoded default.
    pub fn new(pool: PgPool, cluster_max_attempts: i32, severity_max_attempts: i32) -> Self {
        Self {
            pool,
            cluster_max_attempts,
            severity_max_attempts,
        }
    }

    fn max_attempts_for(&self, job: &EngineJob) -> i32 {
        match job {
            EngineJob::Cluster(_) => self.cluster_max_attempts,
            EngineJob::Severity(_) => self.severity_max_attempts,
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: EngineJob) -> EngineResult<()> {
        let max_attempts = self.max_attempts_for(&job);
        let payload = match &job {
            EngineJob::Cluster(c) => serde_json::to_value(c),
            EngineJob::Severity(s) => serde_json::to_value(s),
        }
        .expect("EngineJob variants always serialize");

        sqlx::query(
            "INSERT INTO jobs (id, queue_name, job_type, payload, status, attempt, max_attempts, next_run_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'pending', 0, $5, NOW(), NOW(), NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(job.queue_name())
        .bind(job.job_type())
        .bind(payload)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        debug!(queue = job.queue_name(), job_type = job.job_type(), max_attempts, "enqueued job");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobQueue {
    async fn claim_ready(
        &self,
        queue_name: &str,
        worker_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<ClaimedJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "WITH next_jobs AS (
                SELECT id FROM jobs
                WHERE queue_name = $1
                  AND status = 'pending'
                  AND next_run_at <= NOW()
                ORDER BY next_run_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
             )
             UPDATE jobs
             SET status = 'running', attempt = attempt + 1, worker_id = $3, updated_at = NOW()
             WHERE id IN (SELECT id FROM next_jobs)
             RETURNING id, job_type, payload, attempt, max_attempts",
        )
        .bind(queue_name)
        .bind(limit)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ClaimedJob {
                    id: row.id,
                    job: decode_payload(&row.job_type, row.payload)?,
                    attempt: row.attempt,
                    max_attempts: row.max_attempts,
                })
            })
            .collect()
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> EngineResult<()> {
        sqlx::query("UPDATE jobs SET status = 'succeeded', updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retryable: bool,
        backoff: std::time::Duration,
    ) -> EngineResult<()> {
        if retryable {
            let next_run_at: DateTime<Utc> = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
            sqlx::query(
                "UPDATE jobs
                 SET status = CASE WHEN attempt < max_attempts THEN 'pending' ELSE 'dead_letter' END,
                     next_run_at = $2,
                     error_message = $3,
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(next_run_at)
            .bind(error)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'dead_letter', error_message = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}
