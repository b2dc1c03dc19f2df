//! Integration tests for the clustering pipeline against a real
//! Postgres+pgvector instance. Embedding and arbitration are faked so the
//! test is deterministic; the store layer (relational + vector) is the
//! real thing.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use incident_engine_core::domains::incidents::{ClusterInput, ClusteringUseCase};
use incident_engine_core::kernel::test_dependencies::ScriptedArbiter;
use incident_engine_core::kernel::traits::{BarangayId, CategoryId, ComplaintId, IncidentStore};
use sqlx::PgPool;
use test_context::test_context;

use common::TestHarness;

/// Deterministic embedder for integration tests: text maps to a 2D unit
/// vector at a fixed angle, so cosine similarity between two known texts is
/// fully controlled by the test rather than a real model's geometry.
struct AngleEmbedder;

#[async_trait::async_trait]
impl incident_engine_core::kernel::traits::Embedder for AngleEmbedder {
    async fn embed(&self, text: &str) -> incident_engine_core::EngineResult<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(incident_engine_core::EngineError::InvalidInput(
                "empty".to_string(),
            ));
        }
        // The angle is encoded in the text itself (e.g. "angle:0.82") so
        // each test can dial in the exact cosine similarity it needs.
        let angle: f32 = trimmed
            .strip_prefix("angle:")
            .and_then(|rest| rest.parse().ok())
            .unwrap_or(1.0);
        Ok(vec![angle.cos(), angle.sin()])
    }

    fn dimension(&self) -> usize {
        2
    }
}

async fn seed_complaint(pool: &PgPool, barangay: i64, category: i64, author: i64) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO complaints (title, description, barangay_id, category_id, author_id, status)
         VALUES ('t', 'd', $1, $2, $3, 'submitted') RETURNING id",
    )
    .bind(barangay)
    .bind(category)
    .bind(author)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_category_config(pool: &PgPool, category: i64, weight: f64, window_hours: f64, threshold: f64) {
    sqlx::query(
        "INSERT INTO category_configs (category_id, base_severity_weight, time_window_hours, similarity_threshold)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(category)
    .bind(weight)
    .bind(window_hours)
    .bind(threshold)
    .execute(pool)
    .await
    .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
async fn first_complaint_creates_a_new_incident(ctx: &mut TestHarness) {
    let barangay = BarangayId::new(7);
    let category = CategoryId::new(5);
    seed_category_config(&ctx.db_pool, 5, 5.0, 24.0, 0.65).await;
    let complaint_id = seed_complaint(&ctx.db_pool, 7, 5, 1).await;

    let clustering = ClusteringUseCase::new(
        Arc::new(AngleEmbedder),
        ctx.vector_store.clone(),
        ctx.incident_store.clone(),
        Arc::new(ScriptedArbiter::new(false)),
    );

    let input = ClusterInput {
        complaint_id: ComplaintId::new(complaint_id),
        user_id: 1,
        title: "Flooding".to_string(),
        description: "angle:0.0".to_string(),
        barangay_id: barangay,
        category_id: category,
        created_at: Utc::now(),
        window_hours: 24.0,
        base_weight: 5.0,
        threshold: 0.65,
    };

    let result = clustering.execute(input).await.unwrap();

    assert!(result.is_new_incident);
    assert_eq!(result.similarity_score, 1.0);

    let incident = ctx
        .incident_store
        .get_incident(result.incident_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(incident.complaint_count, 1);
    assert_eq!(incident.severity_score, 5.0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn high_confidence_merge_when_llm_confirms(ctx: &mut TestHarness) {
    let barangay = BarangayId::new(7);
    let category = CategoryId::new(5);
    seed_category_config(&ctx.db_pool, 5, 5.0, 24.0, 0.65).await;

    let arbiter = Arc::new(ScriptedArbiter::with_answers(vec![true]));
    let clustering = ClusteringUseCase::new(
        Arc::new(AngleEmbedder),
        ctx.vector_store.clone(),
        ctx.incident_store.clone(),
        arbiter.clone(),
    );

    let seed_complaint_id = seed_complaint(&ctx.db_pool, 7, 5, 1).await;
    let seed_result = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(seed_complaint_id),
            user_id: 1,
            title: "Flooding".to_string(),
            description: "angle:0.0".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now(),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();
    assert!(seed_result.is_new_incident);

    // A small angle delta keeps cosine similarity above threshold + 0.10.
    let follow_up_id = seed_complaint(&ctx.db_pool, 7, 5, 2).await;
    let follow_up = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(follow_up_id),
            user_id: 2,
            title: "Flooding again".to_string(),
            description: "angle:0.1".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now() + ChronoDuration::minutes(10),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();

    assert!(!follow_up.is_new_incident);
    assert_eq!(follow_up.incident_id, seed_result.incident_id);
    assert_eq!(arbiter.call_count(), 1);

    let incident = ctx
        .incident_store
        .get_incident(follow_up.incident_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(incident.complaint_count, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn below_threshold_creates_new_incident_without_calling_llm(ctx: &mut TestHarness) {
    let barangay = BarangayId::new(7);
    let category = CategoryId::new(5);
    seed_category_config(&ctx.db_pool, 5, 5.0, 24.0, 0.65).await;

    let arbiter = Arc::new(ScriptedArbiter::new(true));
    let clustering = ClusteringUseCase::new(
        Arc::new(AngleEmbedder),
        ctx.vector_store.clone(),
        ctx.incident_store.clone(),
        arbiter.clone(),
    );

    let seed_complaint_id = seed_complaint(&ctx.db_pool, 7, 5, 1).await;
    let seed_result = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(seed_complaint_id),
            user_id: 1,
            title: "Flooding".to_string(),
            description: "angle:0.0".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now(),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();

    // A wide angle delta (~1.0 rad) drives cosine similarity well below
    // the 0.65 threshold.
    let other_id = seed_complaint(&ctx.db_pool, 7, 5, 2).await;
    let other_result = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(other_id),
            user_id: 2,
            title: "Garbage".to_string(),
            description: "angle:1.2".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now() + ChronoDuration::minutes(20),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();

    assert!(other_result.is_new_incident);
    assert_ne!(other_result.incident_id, seed_result.incident_id);
    assert_eq!(arbiter.call_count(), 0, "LLM must not be called below threshold");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn rerunning_a_completed_merge_does_not_double_count_the_membership(ctx: &mut TestHarness) {
    let barangay = BarangayId::new(7);
    let category = CategoryId::new(5);
    seed_category_config(&ctx.db_pool, 5, 5.0, 24.0, 0.65).await;

    let clustering = ClusteringUseCase::new(
        Arc::new(AngleEmbedder),
        ctx.vector_store.clone(),
        ctx.incident_store.clone(),
        Arc::new(ScriptedArbiter::new(true)),
    );

    let seed_complaint_id = seed_complaint(&ctx.db_pool, 7, 5, 1).await;
    let seed_result = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(seed_complaint_id),
            user_id: 1,
            title: "Flooding".to_string(),
            description: "angle:0.0".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now(),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();
    assert!(seed_result.is_new_incident);

    let follow_up_id = seed_complaint(&ctx.db_pool, 7, 5, 2).await;
    let follow_up_input = ClusterInput {
        complaint_id: ComplaintId::new(follow_up_id),
        user_id: 2,
        title: "Flooding again".to_string(),
        description: "angle:0.1".to_string(),
        barangay_id: barangay,
        category_id: category,
        created_at: Utc::now() + ChronoDuration::minutes(10),
        window_hours: 24.0,
        base_weight: 5.0,
        threshold: 0.65,
    };

    let first_run = clustering.execute(follow_up_input.clone()).await.unwrap();
    assert!(!first_run.is_new_incident);
    assert_eq!(first_run.incident_id, seed_result.incident_id);

    let incident_after_first_run = ctx
        .incident_store
        .get_incident(first_run.incident_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(incident_after_first_run.complaint_count, 2);

    // Simulate at-least-once redelivery of the same completed cluster job
    // (e.g. the worker timed out after commit but before acking).
    let second_run = clustering.execute(follow_up_input).await.unwrap();
    assert!(!second_run.is_new_incident);
    assert_eq!(second_run.incident_id, seed_result.incident_id);

    let incident_after_rerun = ctx
        .incident_store
        .get_incident(second_run.incident_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        incident_after_rerun.complaint_count, 2,
        "replaying a completed cluster job must not double-count the membership"
    );

    let membership_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM incident_memberships WHERE incident_id = $1")
            .bind(second_run.incident_id.as_i64())
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(membership_count, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn race_guard_creates_new_incident_when_candidate_already_expired(ctx: &mut TestHarness) {
    let barangay = BarangayId::new(7);
    let category = CategoryId::new(5);
    seed_category_config(&ctx.db_pool, 5, 5.0, 24.0, 0.65).await;

    let clustering = ClusteringUseCase::new(
        Arc::new(AngleEmbedder),
        ctx.vector_store.clone(),
        ctx.incident_store.clone(),
        Arc::new(ScriptedArbiter::new(true)),
    );

    let seed_complaint_id = seed_complaint(&ctx.db_pool, 7, 5, 1).await;
    let seed_result = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(seed_complaint_id),
            user_id: 1,
            title: "Flooding".to_string(),
            description: "angle:0.0".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now(),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();

    // Expire the seed incident directly via the repository, simulating the
    // lifecycle scheduler winning the race between scoring and merge.
    sqlx::query("UPDATE incidents SET status = 'EXPIRED' WHERE id = $1")
        .bind(seed_result.incident_id.as_i64())
        .execute(&ctx.db_pool)
        .await
        .unwrap();

    let follow_up_id = seed_complaint(&ctx.db_pool, 7, 5, 2).await;
    let follow_up = clustering
        .execute(ClusterInput {
            complaint_id: ComplaintId::new(follow_up_id),
            user_id: 2,
            title: "Flooding again".to_string(),
            description: "angle:0.05".to_string(),
            barangay_id: barangay,
            category_id: category,
            created_at: Utc::now() + ChronoDuration::minutes(10),
            window_hours: 24.0,
            base_weight: 5.0,
            threshold: 0.65,
        })
        .await
        .unwrap();

    // list_active_in_window already excludes the expired seed, so no
    // candidate is even scored — the new complaint seeds its own incident.
    assert!(follow_up.is_new_incident);
    assert_ne!(follow_up.incident_id, seed_result.incident_id);
}
