// Postgres-backed `IncidentStore`.
//
// Authoritative relational state for incidents, the incident<->complaint
// join, and per-category configuration. Candidate discovery for clustering
// reads from here rather than the vector store, so relational commit stays
// the single source of truth (see `domains::incidents::clustering`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::common::time::band;
use crate::errors::{EngineError, EngineResult};
use crate::kernel::traits::{
    BarangayId, CategoryConfig, CategoryId, ComplaintId, ComplaintStatus, Incident,
    IncidentId, IncidentMembership, IncidentStatus, IncidentStore, MembershipId,
};

pub struct PgIncidentStore {
    pool: PgPool,
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: i64,
    title: String,
    description: String,
    barangay_id: i64,
    category_id: i64,
    status: String,
    complaint_count: i32,
    severity_score: f64,
    time_window_hours: f64,
    first_reported_at: DateTime<Utc>,
    last_reported_at: DateTime<Utc>,
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        Incident {
            id: IncidentId::new(row.id),
            title: row.title,
            description: row.description,
            barangay_id: BarangayId::new(row.barangay_id),
            category_id: CategoryId::new(row.category_id),
            status: if row.status == "EXPIRED" {
                IncidentStatus::Expired
            } else {
                IncidentStatus::Active
            },
            complaint_count: row.complaint_count,
            severity_score: row.severity_score,
            severity_level: band(row.severity_score),
            time_window_hours: row.time_window_hours,
            first_reported_at: row.first_reported_at,
            last_reported_at: row.last_reported_at,
        }
    }
}

fn status_str(status: IncidentStatus) -> &'static str {
    match status {
        IncidentStatus::Active => "ACTIVE",
        IncidentStatus::Expired => "EXPIRED",
    }
}

#[cfg(test)]
fn complaint_status_str(status: ComplaintStatus) -> &'static str {
    match status {
        ComplaintStatus::Submitted => "submitted",
        ComplaintStatus::UnderReview => "under_review",
        ComplaintStatus::ForwardedToLgu => "forwarded_to_lgu",
        ComplaintStatus::ForwardedToDepartment => "forwarded_to_department",
        ComplaintStatus::Resolved => "resolved",
    }
}

fn complaint_status_from_str(s: &str) -> Option<ComplaintStatus> {
    Some(match s {
        "submitted" => ComplaintStatus::Submitted,
        "under_review" => ComplaintStatus::UnderReview,
        "forwarded_to_lgu" => ComplaintStatus::ForwardedToLgu,
        "forwarded_to_department" => ComplaintStatus::ForwardedToDepartment,
        "resolved" => ComplaintStatus::Resolved,
        _ => return None,
    })
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    #[instrument(skip(self))]
    async fn get_incident(&self, id: IncidentId) -> EngineResult<Option<Incident>> {
        let row = sqlx::query_as::<_, IncidentRow>("SELECT * FROM incidents WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Incident::from))
    }

    #[instrument(skip(self, incident))]
    async fn create_incident(&self, incident: Incident) -> EngineResult<Incident> {
        let row = sqlx::query_as::<_, IncidentRow>(
            "INSERT INTO incidents
                (title, description, barangay_id, category_id, status, complaint_count,
                 severity_score, time_window_hours, first_reported_at, last_reported_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING *",
        )
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(incident.barangay_id.as_i64())
        .bind(incident.category_id.as_i64())
        .bind(status_str(incident.status))
        .bind(incident.complaint_count)
        .bind(incident.severity_score)
        .bind(incident.time_window_hours)
        .bind(incident.first_reported_at)
        .bind(incident.last_reported_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self, incident))]
    async fn update_incident(&self, incident: Incident) -> EngineResult<Incident> {
        let row = sqlx::query_as::<_, IncidentRow>(
            "UPDATE incidents SET
                title = $2,
                description = $3,
                status = $4,
                complaint_count = $5,
                severity_score = $6,
                time_window_hours = $7,
                last_reported_at = $8
             WHERE id = $1
             RETURNING *",
        )
        .bind(incident.id.as_i64())
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(status_str(incident.status))
        .bind(incident.complaint_count)
        .bind(incident.severity_score)
        .bind(incident.time_window_hours)
        .bind(incident.last_reported_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("incident {} not found", incident.id)))?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn link_complaint(
        &self,
        incident_id: IncidentId,
        complaint_id: ComplaintId,
        similarity_score: f64,
    ) -> EngineResult<IncidentMembership> {
        let row: (i64, i64, i64, f64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO incident_memberships (incident_id, complaint_id, similarity_score, linked_at)
             VALUES ($1, $2, $3, NOW())
             RETURNING id, incident_id, complaint_id, similarity_score, linked_at",
        )
        .bind(incident_id.as_i64())
        .bind(complaint_id.as_i64())
        .bind(similarity_score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return EngineError::Conflict(format!(
                        "complaint {complaint_id} already linked to incident {incident_id}"
                    ));
                }
            }
            EngineError::from(e)
        })?;

        Ok(IncidentMembership {
            id: MembershipId::new(row.0),
            incident_id: IncidentId::new(row.1),
            complaint_id: ComplaintId::new(row.2),
            similarity_score: row.3,
            linked_at: row.4,
        })
    }

    #[instrument(skip(self))]
    async fn merge_complaint_into_incident(
        &self,
        incident_id: IncidentId,
        complaint_id: ComplaintId,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Incident>> {
        let mut tx = self.pool.begin().await?;

        // Lock the candidate row for the life of the transaction so a
        // concurrent merge or the lifecycle sweep can't flip its status
        // out from under us between this check and the update below.
        let row = sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM incidents WHERE id = $1 FOR UPDATE",
        )
        .bind(incident_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        if row.status != "ACTIVE" {
            return Ok(None);
        }

        // A duplicate (incident_id, complaint_id) is a no-op: replaying a
        // completed cluster job must not double-count the membership.
        sqlx::query(
            "INSERT INTO incident_memberships (incident_id, complaint_id, similarity_score, linked_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (incident_id, complaint_id) DO NOTHING",
        )
        .bind(incident_id.as_i64())
        .bind(complaint_id.as_i64())
        .bind(similarity_score)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // complaint_count is derived from the membership rows rather than
        // incremented from a prior read, so two concurrent merges (or a
        // redelivered job) can never drift it away from the true count.
        let updated = sqlx::query_as::<_, IncidentRow>(
            "UPDATE incidents SET
                complaint_count = (SELECT COUNT(*) FROM incident_memberships WHERE incident_id = $1),
                last_reported_at = GREATEST(last_reported_at, $2)
             WHERE id = $1
             RETURNING *",
        )
        .bind(incident_id.as_i64())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated.into()))
    }

    #[instrument(skip(self))]
    async fn list_active_in_window(
        &self,
        barangay_id: BarangayId,
        category_id: CategoryId,
        window_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Incident>> {
        let cutoff = now - chrono::Duration::seconds((window_hours * 3600.0) as i64);

        let rows = sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM incidents
             WHERE barangay_id = $1
               AND category_id = $2
               AND status = 'ACTIVE'
               AND last_reported_at >= $3
             ORDER BY last_reported_at DESC",
        )
        .bind(barangay_id.as_i64())
        .bind(category_id.as_i64())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Incident::from).collect())
    }

    #[instrument(skip(self))]
    async fn count_memberships_in_window(
        &self,
        incident_id: IncidentId,
        window_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let cutoff = now - chrono::Duration::seconds((window_hours * 3600.0) as i64);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM incident_memberships
             WHERE incident_id = $1 AND linked_at >= $2",
        )
        .bind(incident_id.as_i64())
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[instrument(skip(self))]
    async fn get_category_config(&self, category_id: CategoryId) -> EngineResult<CategoryConfig> {
        let row: Option<(f64, f64, f64)> = sqlx::query_as(
            "SELECT base_severity_weight, time_window_hours, similarity_threshold
             FROM category_configs WHERE category_id = $1",
        )
        .bind(category_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((base_severity_weight, time_window_hours, similarity_threshold)) => {
                CategoryConfig {
                    category_id,
                    base_severity_weight,
                    time_window_hours,
                    similarity_threshold,
                    is_configured: true,
                }
            }
            None => CategoryConfig::default_for(category_id),
        })
    }

    #[instrument(skip(self))]
    async fn complaint_statuses_for_incident(
        &self,
        incident_id: IncidentId,
    ) -> EngineResult<Vec<ComplaintStatus>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT c.status
             FROM complaints c
             JOIN incident_memberships m ON m.complaint_id = c.id
             WHERE m.incident_id = $1",
        )
        .bind(incident_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(|s| complaint_status_from_str(s)).collect())
    }

    #[instrument(skip(self))]
    async fn expire_overdue(&self, now: DateTime<Utc>) -> EngineResult<Vec<IncidentId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "UPDATE incidents
             SET status = 'EXPIRED'
             WHERE status = 'ACTIVE'
               AND last_reported_at + (time_window_hours * INTERVAL '1 hour') <= $1
             RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(IncidentId::new).collect())
    }
}
