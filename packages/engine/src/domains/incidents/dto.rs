//! External interfaces: the input the API layer hands to the clustering
//! use case after a complaint row exists, and the output it hands back to
//! the response builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::time::SeverityLevel;
use crate::kernel::traits::{BarangayId, CategoryId, ComplaintId, IncidentId};

/// `ClusterInput` = the inbound contract invoked by the API layer after a
/// complaint row exists. The caller has already resolved
/// `window_hours`/`base_weight`/`threshold` via
/// `IncidentStore::get_category_config` and passes them through so the use
/// case does not need to re-fetch category config mid-job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInput {
    pub complaint_id: ComplaintId,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub barangay_id: BarangayId,
    pub category_id: CategoryId,
    pub created_at: DateTime<Utc>,
    pub window_hours: f64,
    pub base_weight: f64,
    pub threshold: f64,
}

/// `ClusterResult` — consumed by the API response builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResult {
    pub incident_id: IncidentId,
    pub is_new_incident: bool,
    /// Cosine similarity to the chosen incident's seed vector, in `[0, 1]`.
    /// `1.0` for a newly created incident (its own seed).
    pub similarity_score: f64,
    pub severity_level: SeverityLevel,
    /// Most-urgent status among complaints already linked to the incident,
    /// `None` for a brand-new incident.
    pub existing_incident_status: Option<String>,
    /// User-facing message composed from `existing_incident_status`.
    pub message: Option<String>,
}
