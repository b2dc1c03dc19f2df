//! Integration tests for the durable Postgres-backed job queue:
//! enqueue/claim/ack round-trips and the retry/dead-letter paths.

mod common;

use std::time::Duration;

use chrono::Utc;
use incident_engine_core::jobs::model::{ClusterJob, EngineJob, SeverityJob};
use incident_engine_core::jobs::queue::{JobQueue, JobStore};
use incident_engine_core::kernel::traits::{BarangayId, CategoryId, ComplaintId, IncidentId};
use test_context::test_context;

use common::TestHarness;

fn sample_cluster_job() -> EngineJob {
    EngineJob::Cluster(ClusterJob {
        complaint_id: ComplaintId::new(1),
        user_id: 1,
        title: "Flooding".to_string(),
        description: "water everywhere".to_string(),
        barangay_id: BarangayId::new(1),
        category_id: CategoryId::new(1),
        window_hours: 24.0,
        base_weight: 2.0,
        threshold: 0.65,
        created_at: Utc::now(),
    })
}

#[test_context(TestHarness)]
#[tokio::test]
async fn claim_ready_returns_enqueued_job_with_attempt_one(ctx: &mut TestHarness) {
    ctx.job_queue.enqueue(sample_cluster_job()).await.unwrap();

    let claimed = ctx
        .job_queue
        .claim_ready("cluster", "worker-1", 10)
        .await
        .unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempt, 1);
    assert_eq!(claimed[0].max_attempts, 3);
    assert!(matches!(claimed[0].job, EngineJob::Cluster(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn claimed_jobs_are_not_claimed_twice(ctx: &mut TestHarness) {
    ctx.job_queue.enqueue(sample_cluster_job()).await.unwrap();

    let first = ctx.job_queue.claim_ready("cluster", "worker-1", 10).await.unwrap();
    assert_eq!(first.len(), 1);

    let second = ctx.job_queue.claim_ready("cluster", "worker-2", 10).await.unwrap();
    assert!(second.is_empty(), "a running job must not be claimable again");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn severity_queue_is_independent_of_cluster_queue(ctx: &mut TestHarness) {
    ctx.job_queue.enqueue(sample_cluster_job()).await.unwrap();
    ctx.job_queue
        .enqueue(EngineJob::Severity(SeverityJob {
            incident_id: IncidentId::new(1),
        }))
        .await
        .unwrap();

    let cluster_claims = ctx.job_queue.claim_ready("cluster", "worker-1", 10).await.unwrap();
    let severity_claims = ctx.job_queue.claim_ready("severity", "worker-1", 10).await.unwrap();

    assert_eq!(cluster_claims.len(), 1);
    assert_eq!(severity_claims.len(), 1);
    assert!(matches!(severity_claims[0].job, EngineJob::Severity(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_succeeded_removes_job_from_future_claims(ctx: &mut TestHarness) {
    ctx.job_queue.enqueue(sample_cluster_job()).await.unwrap();
    let claimed = ctx.job_queue.claim_ready("cluster", "worker-1", 10).await.unwrap();

    ctx.job_queue.mark_succeeded(claimed[0].id).await.unwrap();

    let status: String = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
        .bind(claimed[0].id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(status, "succeeded");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_failed_retryable_reschedules_until_attempts_exhausted(ctx: &mut TestHarness) {
    ctx.job_queue.enqueue(sample_cluster_job()).await.unwrap();

    // Drive through all three attempts; the first two should reschedule as
    // 'pending' and the third should dead-letter.
    for expected_attempt in 1..=3 {
        let claimed = ctx.job_queue.claim_ready("cluster", "worker-1", 10).await.unwrap();
        assert_eq!(claimed.len(), 1, "attempt {expected_attempt} should have a claimable job");
        assert_eq!(claimed[0].attempt, expected_attempt);

        ctx.job_queue
            .mark_failed(claimed[0].id, "transient failure", true, Duration::from_millis(0))
            .await
            .unwrap();
    }

    let (status, attempt): (String, i32) =
        sqlx::query_as("SELECT status, attempt FROM jobs WHERE queue_name = 'cluster'")
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(status, "dead_letter");
    assert_eq!(attempt, 3);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_failed_non_retryable_dead_letters_immediately(ctx: &mut TestHarness) {
    ctx.job_queue.enqueue(sample_cluster_job()).await.unwrap();
    let claimed = ctx.job_queue.claim_ready("cluster", "worker-1", 10).await.unwrap();

    ctx.job_queue
        .mark_failed(claimed[0].id, "permanent failure", false, Duration::from_secs(30))
        .await
        .unwrap();

    let (status, error_message): (String, Option<String>) =
        sqlx::query_as("SELECT status, error_message FROM jobs WHERE id = $1")
            .bind(claimed[0].id)
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(status, "dead_letter");
    assert_eq!(error_message.as_deref(), Some("permanent failure"));

    let still_claimable = ctx.job_queue.claim_ready("cluster", "worker-2", 10).await.unwrap();
    assert!(still_claimable.is_empty());
}
