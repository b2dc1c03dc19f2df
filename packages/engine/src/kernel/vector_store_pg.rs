// pgvector-backed `VectorStore`.
//
// Complaint vectors live in a dedicated table indexed by pgvector's cosine
// operator (`<=>`), a raw sqlx + pgvector approach to similarity search
// rather than standing up a separate vector database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::errors::EngineResult;
use crate::kernel::traits::{
    BarangayId, CategoryId, ComplaintId, ComplaintVectorMeta, IncidentId, IncidentStatus,
    MetadataPatch, SimilarityCandidate, StoredVector, VectorStore,
};

pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: IncidentStatus) -> &'static str {
    match status {
        IncidentStatus::Active => "ACTIVE",
        IncidentStatus::Expired => "EXPIRED",
    }
}

fn status_from_str(s: &str) -> IncidentStatus {
    match s {
        "EXPIRED" => IncidentStatus::Expired,
        _ => IncidentStatus::Active,
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self, embedding))]
    async fn upsert(
        &self,
        complaint_id: ComplaintId,
        embedding: &[f32],
        meta: ComplaintVectorMeta,
    ) -> EngineResult<()> {
        let vector = Vector::from(embedding.to_vec());

        sqlx::query(
            "INSERT INTO complaint_vectors
                (complaint_id, embedding, barangay_id, category_id, incident_id, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (complaint_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                barangay_id = EXCLUDED.barangay_id,
                category_id = EXCLUDED.category_id,
                incident_id = EXCLUDED.incident_id,
                status = EXCLUDED.status,
                created_at = EXCLUDED.created_at",
        )
        .bind(complaint_id.as_i64())
        .bind(vector)
        .bind(meta.barangay_id.as_i64())
        .bind(meta.category_id.as_i64())
        .bind(meta.incident_id.map(|id| id.as_i64()))
        .bind(status_str(meta.status))
        .bind(meta.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, query_vec))]
    async fn query_similar(
        &self,
        query_vec: &[f32],
        barangay_id: BarangayId,
        category_id: CategoryId,
        since: DateTime<Utc>,
        top_k: usize,
    ) -> EngineResult<Vec<SimilarityCandidate>> {
        let vector = Vector::from(query_vec.to_vec());

        let rows: Vec<(i64, Option<i64>, f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT
                complaint_id,
                incident_id,
                1 - (embedding <=> $1) AS similarity,
                created_at
             FROM complaint_vectors
             WHERE barangay_id = $2
               AND category_id = $3
               AND status = 'ACTIVE'
               AND created_at >= $4
             ORDER BY similarity DESC, created_at DESC, complaint_id DESC
             LIMIT $5",
        )
        .bind(&vector)
        .bind(barangay_id.as_i64())
        .bind(category_id.as_i64())
        .bind(since)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        debug!(candidate_count = rows.len(), "fetched similarity candidates");

        Ok(rows
            .into_iter()
            .map(|(complaint_id, incident_id, score, created_at)| SimilarityCandidate {
                complaint_id: ComplaintId::new(complaint_id),
                incident_id: incident_id.map(IncidentId::new),
                score,
                created_at,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_incident_vector(
        &self,
        incident_id: IncidentId,
    ) -> EngineResult<Option<StoredVector>> {
        let row: Option<(Vector, i64, i64, i64, Option<i64>, String, DateTime<Utc>)> =
            sqlx::query_as(
                "SELECT embedding, complaint_id, barangay_id, category_id, incident_id, status, created_at
                 FROM complaint_vectors
                 WHERE incident_id = $1
                 ORDER BY created_at ASC
                 LIMIT 1",
            )
            .bind(incident_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(embedding, complaint_id, barangay_id, category_id, incident_id, status, created_at)| {
                StoredVector {
                    embedding: embedding.to_vec(),
                    meta: ComplaintVectorMeta {
                        complaint_id: ComplaintId::new(complaint_id),
                        barangay_id: BarangayId::new(barangay_id),
                        category_id: CategoryId::new(category_id),
                        incident_id: incident_id.map(IncidentId::new),
                        status: status_from_str(&status),
                        created_at,
                    },
                }
            },
        ))
    }

    #[instrument(skip(self, incident_ids))]
    async fn batch_fetch_incident_vectors(
        &self,
        incident_ids: &[IncidentId],
    ) -> EngineResult<HashMap<IncidentId, StoredVector>> {
        let mut out = HashMap::with_capacity(incident_ids.len());
        // Best-effort: missing incidents are simply absent from the map.
        for &id in incident_ids {
            if let Some(vector) = self.fetch_incident_vector(id).await? {
                out.insert(id, vector);
            }
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn update_metadata(
        &self,
        complaint_id: ComplaintId,
        patch: MetadataPatch,
    ) -> EngineResult<()> {
        if patch.incident_id.is_none() && patch.status.is_none() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE complaint_vectors
             SET incident_id = COALESCE($2, incident_id),
                 status = COALESCE($3, status)
             WHERE complaint_id = $1",
        )
        .bind(complaint_id.as_i64())
        .bind(patch.incident_id.map(|id| id.as_i64()))
        .bind(patch.status.map(status_str))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status_by_incident(
        &self,
        incident_id: IncidentId,
        status: IncidentStatus,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE complaint_vectors SET status = $2 WHERE incident_id = $1")
            .bind(incident_id.as_i64())
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
