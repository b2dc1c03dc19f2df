//! Job payloads for the task runtime: tagged variants instead of a
//! dynamic dict-typed payload, so the bus only ever transports one of
//! `ClusterJob | SeverityJob`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::traits::{BarangayId, CategoryId, ComplaintId, IncidentId};

/// `Cluster{complaint_id, user_id, title, description, barangay_id,
/// category_id, window_hours, base_weight, threshold, created_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterJob {
    pub complaint_id: ComplaintId,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub barangay_id: BarangayId,
    pub category_id: CategoryId,
    pub window_hours: f64,
    pub base_weight: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
}

/// `RecomputeSeverity{incident_id}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityJob {
    pub incident_id: IncidentId,
}

/// The bus only transports one of these two kinds, each on its own
/// logical queue (`cluster` / `severity`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineJob {
    Cluster(ClusterJob),
    Severity(SeverityJob),
}

impl EngineJob {
    /// The logical queue this job is carried on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            EngineJob::Cluster(_) => "cluster",
            EngineJob::Severity(_) => "severity",
        }
    }

    /// The `job_type` discriminator persisted alongside the payload.
    pub fn job_type(&self) -> &'static str {
        match self {
            EngineJob::Cluster(_) => "cluster",
            EngineJob::Severity(_) => "recompute_severity",
        }
    }
}

impl From<ClusterJob> for EngineJob {
    fn from(job: ClusterJob) -> Self {
        EngineJob::Cluster(job)
    }
}

impl From<SeverityJob> for EngineJob {
    fn from(job: SeverityJob) -> Self {
        EngineJob::Severity(job)
    }
}
