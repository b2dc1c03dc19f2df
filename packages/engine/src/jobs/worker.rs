//! The worker pool: a pool of parallel workers, each claiming one job at a
//! time and running it to completion sequentially.
//! No shared mutable state between jobs beyond the stores. `Cluster`
//! success enqueues a follow-up `RecomputeSeverity` on the `severity`
//! queue; any failure is classified via the error taxonomy and retried
//! with the job kind's fixed backoff, or dead-lettered once retries are
//! exhausted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domains::incidents::dto::ClusterInput;
use crate::domains::incidents::{ClusteringUseCase, SeverityUseCase};
use crate::errors::EngineResult;
use crate::jobs::model::{EngineJob, SeverityJob};
use crate::jobs::queue::{ClaimedJob, JobQueue, JobStore};

/// Everything a worker needs to run either job kind. Constructed once at
/// startup (see `EngineKernel`) and shared (behind `Arc`) across every
/// worker task.
pub struct WorkerContext {
    pub job_store: Arc<dyn JobStore>,
    pub job_queue: Arc<dyn JobQueue>,
    pub clustering: Arc<ClusteringUseCase>,
    pub severity: Arc<SeverityUseCase>,
    pub cluster_backoff: Duration,
    pub severity_backoff: Duration,
    pub job_wall_clock_cap: Duration,
    pub poll_interval: Duration,
}

/// Spawns `worker_count` tasks polling `queue_name`, running until the
/// process is shut down (the returned handles never resolve under normal
/// operation; callers typically `tokio::select!` against a shutdown
/// signal rather than awaiting this directly).
pub fn spawn_worker_pool(
    ctx: Arc<WorkerContext>,
    queue_name: &'static str,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            let worker_id = format!("{queue_name}-{i}");
            tokio::spawn(async move { worker_loop(ctx, queue_name, worker_id).await })
        })
        .collect()
}

async fn worker_loop(ctx: Arc<WorkerContext>, queue_name: &'static str, worker_id: String) {
    loop {
        match ctx.job_store.claim_ready(queue_name, &worker_id, 1).await {
            Ok(jobs) if jobs.is_empty() => {
                tokio::time::sleep(ctx.poll_interval).await;
            }
            Ok(jobs) => {
                for claimed in jobs {
                    process_job(&ctx, claimed).await;
                }
            }
            Err(err) => {
                error!(worker_id = %worker_id, error = %err, "failed to claim jobs");
                tokio::time::sleep(ctx.poll_interval).await;
            }
        }
    }
}

async fn process_job(ctx: &WorkerContext, claimed: ClaimedJob) {
    let backoff = match &claimed.job {
        EngineJob::Cluster(_) => ctx.cluster_backoff,
        EngineJob::Severity(_) => ctx.severity_backoff,
    };

    let outcome = tokio::time::timeout(ctx.job_wall_clock_cap, execute(ctx, claimed.job.clone())).await;

    match outcome {
        Ok(Ok(())) => {
            if let Err(err) = ctx.job_store.mark_succeeded(claimed.id).await {
                error!(job_id = %claimed.id, error = %err, "failed to mark job succeeded");
            }
        }
        Ok(Err(err)) => {
            let retryable = err.is_retryable() && claimed.attempt < claimed.max_attempts;
            warn!(job_id = %claimed.id, error = %err, retryable, "job failed");
            if let Err(mark_err) = ctx
                .job_store
                .mark_failed(claimed.id, &err.to_string(), retryable, backoff)
                .await
            {
                error!(job_id = %claimed.id, error = %mark_err, "failed to mark job failed");
            }
        }
        Err(_elapsed) => {
            warn!(job_id = %claimed.id, "job exceeded wall-clock cap");
            let retryable = claimed.attempt < claimed.max_attempts;
            if let Err(mark_err) = ctx
                .job_store
                .mark_failed(claimed.id, "job exceeded wall-clock cap", retryable, backoff)
                .await
            {
                error!(job_id = %claimed.id, error = %mark_err, "failed to mark job failed");
            }
        }
    }
}

async fn execute(ctx: &WorkerContext, job: EngineJob) -> EngineResult<()> {
    match job {
        EngineJob::Cluster(cluster_job) => {
            let input = ClusterInput {
                complaint_id: cluster_job.complaint_id,
                user_id: cluster_job.user_id,
                title: cluster_job.title,
                description: cluster_job.description,
                barangay_id: cluster_job.barangay_id,
                category_id: cluster_job.category_id,
                created_at: cluster_job.created_at,
                window_hours: cluster_job.window_hours,
                base_weight: cluster_job.base_weight,
                threshold: cluster_job.threshold,
            };
            let result = ctx.clustering.execute(input).await?;

            info!(incident_id = %result.incident_id, "cluster job succeeded, enqueuing severity recompute");
            ctx.job_queue
                .enqueue(EngineJob::Severity(SeverityJob {
                    incident_id: result.incident_id,
                }))
                .await?;
            Ok(())
        }
        EngineJob::Severity(severity_job) => {
            ctx.severity.execute(severity_job.incident_id, Utc::now()).await?;
            Ok(())
        }
    }
}

/// A worker id unique to this process, used when no caller-supplied id is
/// available (e.g. the `migrate_cli`/one-off tools never claim jobs, but a
/// long-running worker binary wants a stable-ish identity for logging).
pub fn process_worker_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{
        FakeEmbedder, InMemoryIncidentStore, InMemoryVectorStore, ScriptedArbiter, SpyEngineJobQueue,
    };

    fn context_with(
        incident_store: Arc<InMemoryIncidentStore>,
        vector_store: Arc<InMemoryVectorStore>,
        job_queue: Arc<SpyEngineJobQueue>,
    ) -> WorkerContext {
        let embedder = Arc::new(FakeEmbedder::new(16));
        let arbiter = Arc::new(ScriptedArbiter::new(false));
        let clustering = Arc::new(ClusteringUseCase::new(
            embedder,
            vector_store.clone(),
            incident_store.clone(),
            arbiter,
        ));
        let severity = Arc::new(SeverityUseCase::new(incident_store.clone()));

        WorkerContext {
            job_store: Arc::new(NeverClaims),
            job_queue,
            clustering,
            severity,
            cluster_backoff: Duration::from_secs(10),
            severity_backoff: Duration::from_secs(5),
            job_wall_clock_cap: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// A `JobStore` that never has anything to claim; only used so
    /// `WorkerContext` can be constructed for `execute()`-level tests
    /// below, which bypass `process_job`/`worker_loop` entirely.
    struct NeverClaims;

    #[async_trait::async_trait]
    impl JobStore for NeverClaims {
        async fn claim_ready(&self, _: &str, _: &str, _: i64) -> EngineResult<Vec<ClaimedJob>> {
            Ok(vec![])
        }
        async fn mark_succeeded(&self, _: Uuid) -> EngineResult<()> {
            Ok(())
        }
        async fn mark_failed(&self, _: Uuid, _: &str, _: bool, _: Duration) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cluster_job_enqueues_severity_followup() {
        let incident_store = Arc::new(InMemoryIncidentStore::new());
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let job_queue = Arc::new(SpyEngineJobQueue::new());
        let ctx = context_with(incident_store, vector_store, job_queue.clone());

        let job = EngineJob::Cluster(crate::jobs::model::ClusterJob {
            complaint_id: crate::kernel::traits::ComplaintId::new(1),
            user_id: 1,
            title: "Flooding".into(),
            description: "Baha sa Purok 3".into(),
            barangay_id: crate::kernel::traits::BarangayId::new(7),
            category_id: crate::kernel::traits::CategoryId::new(5),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
            created_at: Utc::now(),
        });

        execute(&ctx, job).await.unwrap();

        let enqueued = job_queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert!(matches!(enqueued[0], EngineJob::Severity(_)));
    }
}
