//! Capability interfaces the use cases in `domains::incidents` are generic
//! over: `Embedder`, `Arbiter`, `VectorStore`, `IncidentStore`. Each is
//! defined purely by the operations a use case needs, so a Postgres-backed
//! implementation and an in-memory test double are interchangeable behind
//! `Arc<dyn Trait>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::id::Id;
use crate::common::time::SeverityLevel;
use crate::errors::EngineResult;

pub struct IncidentMarker;
pub struct ComplaintMarker;
pub struct CategoryMarker;
pub struct BarangayMarker;
pub struct MembershipMarker;

pub type IncidentId = Id<IncidentMarker>;
pub type ComplaintId = Id<ComplaintMarker>;
pub type CategoryId = Id<CategoryMarker>;
pub type BarangayId = Id<BarangayMarker>;
pub type MembershipId = Id<MembershipMarker>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Active,
    Expired,
}

/// Status of a complaint linked to an incident, as tracked by the
/// surrounding workflow (never mutated by the clustering core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Submitted,
    UnderReview,
    ForwardedToLgu,
    ForwardedToDepartment,
    Resolved,
}

impl ComplaintStatus {
    /// Rank used to pick the most-urgent status when composing the
    /// user-facing merge message: `under_review` > `forwarded_to_lgu` >
    /// `forwarded_to_department` > `resolved` > `submitted`.
    fn urgency_rank(self) -> u8 {
        match self {
            ComplaintStatus::UnderReview => 0,
            ComplaintStatus::ForwardedToLgu => 1,
            ComplaintStatus::ForwardedToDepartment => 2,
            ComplaintStatus::Resolved => 3,
            ComplaintStatus::Submitted => 4,
        }
    }

    /// Picks the most-urgent status out of a set of linked complaint
    /// statuses, or `None` if the set is empty.
    pub fn most_urgent(statuses: &[ComplaintStatus]) -> Option<ComplaintStatus> {
        statuses.iter().copied().min_by_key(|s| s.urgency_rank())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub description: String,
    pub barangay_id: BarangayId,
    pub category_id: CategoryId,
    pub status: IncidentStatus,
    pub complaint_count: i32,
    pub severity_score: f64,
    pub severity_level: SeverityLevel,
    pub time_window_hours: f64,
    pub first_reported_at: DateTime<Utc>,
    pub last_reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentMembership {
    pub id: MembershipId,
    pub incident_id: IncidentId,
    pub complaint_id: ComplaintId,
    pub similarity_score: f64,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub category_id: CategoryId,
    pub base_severity_weight: f64,
    pub time_window_hours: f64,
    pub similarity_threshold: f64,
    /// `true` when this came from a `category_configs` row, `false` when
    /// the store fell back to the hardcoded default for an unconfigured
    /// category. Lets `domains::incidents::severity` tell "really
    /// configured at 2.0" apart from "unconfigured, defaulted to 2.0"
    /// before consulting its own built-in per-category weight table.
    pub is_configured: bool,
}

impl CategoryConfig {
    /// Default configuration for a category with no explicit row, per the
    /// repository contract.
    pub fn default_for(category_id: CategoryId) -> Self {
        Self {
            category_id,
            base_severity_weight: 2.0,
            time_window_hours: 24.0,
            similarity_threshold: 0.65,
            is_configured: false,
        }
    }
}

/// A candidate returned by a vector-store similarity query.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityCandidate {
    pub complaint_id: ComplaintId,
    pub incident_id: Option<IncidentId>,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// Per-complaint vector metadata as stored alongside the embedding.
#[derive(Debug, Clone)]
pub struct ComplaintVectorMeta {
    pub complaint_id: ComplaintId,
    pub barangay_id: BarangayId,
    pub category_id: CategoryId,
    /// `None` means "no incident yet" (the −1 sentinel in the wire model).
    pub incident_id: Option<IncidentId>,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
}

/// A fetched complaint vector: the embedding plus its metadata.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub embedding: Vec<f32>,
    pub meta: ComplaintVectorMeta,
}

/// Partial update to a complaint vector's metadata; `None` fields are left
/// untouched. `incident_id` only ever moves a vector from unlinked to
/// linked, never back, so a single `Option` is enough to distinguish
/// "don't touch" from "set".
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub incident_id: Option<IncidentId>,
    pub status: Option<IncidentStatus>,
}

/// Maps a text description to a fixed-dimension unit vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// `text` must be non-empty after trimming, or this fails with
    /// `InvalidInput`. The returned vector has `len() == dimension()` and
    /// Euclidean norm ~= 1.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// The fixed dimension `d` every vector this embedder produces has.
    fn dimension(&self) -> usize;
}

/// Same-incident decision for two free-text complaints.
#[async_trait]
pub trait Arbiter: Send + Sync {
    /// Returns `Ok(true)` only for an exact, case-insensitive "YES". A
    /// transient provider error is surfaced as `Err` so the caller can log
    /// it and degrade to "not same incident" per the conservative bias
    /// toward new-incident creation.
    async fn same_incident(&self, complaint_a: &str, complaint_b: &str) -> EngineResult<bool>;
}

/// Persistent vector index with structured metadata and filtered ANN query.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent by id; overwrites metadata on repeat calls.
    async fn upsert(
        &self,
        complaint_id: ComplaintId,
        embedding: &[f32],
        meta: ComplaintVectorMeta,
    ) -> EngineResult<()>;

    /// Top-`top_k` nearest points in cosine similarity, restricted to
    /// `status = ACTIVE`, equal barangay & category, and
    /// `created_at >= since`. Sorted by score descending, ties broken by
    /// larger `created_at` then larger complaint id.
    async fn query_similar(
        &self,
        query_vec: &[f32],
        barangay_id: BarangayId,
        category_id: CategoryId,
        since: DateTime<Utc>,
        top_k: usize,
    ) -> EngineResult<Vec<SimilarityCandidate>>;

    /// The seed (earliest) complaint vector linked to `incident_id`, or
    /// `None` if the incident has no linked vector.
    async fn fetch_incident_vector(
        &self,
        incident_id: IncidentId,
    ) -> EngineResult<Option<StoredVector>>;

    /// Best-effort batched variant of `fetch_incident_vector`. Missing ids
    /// are simply absent from the result map.
    async fn batch_fetch_incident_vectors(
        &self,
        incident_ids: &[IncidentId],
    ) -> EngineResult<std::collections::HashMap<IncidentId, StoredVector>>;

    /// Partial metadata update; `None` fields in `patch` are left
    /// untouched.
    async fn update_metadata(
        &self,
        complaint_id: ComplaintId,
        patch: MetadataPatch,
    ) -> EngineResult<()>;

    /// Mass metadata update for all vectors pointing at `incident_id`.
    async fn update_status_by_incident(
        &self,
        incident_id: IncidentId,
        status: IncidentStatus,
    ) -> EngineResult<()>;
}

/// Local cosine similarity for two unit-norm vectors. Deterministic, never
/// suspends — kept out of the `VectorStore` trait object so callers can
/// invoke it without an async runtime.
pub fn compute_similarity(a: &[f32], b: &[f32]) -> f64 {
    crate::common::utils::cosine_similarity(a, b) as f64
}

/// Authoritative relational state for incidents, memberships, and category
/// configuration.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn get_incident(&self, id: IncidentId) -> EngineResult<Option<Incident>>;

    async fn create_incident(&self, incident: Incident) -> EngineResult<Incident>;

    async fn update_incident(&self, incident: Incident) -> EngineResult<Incident>;

    /// Fails with `Conflict` on a duplicate `(incident_id, complaint_id)`.
    async fn link_complaint(
        &self,
        incident_id: IncidentId,
        complaint_id: ComplaintId,
        similarity_score: f64,
    ) -> EngineResult<IncidentMembership>;

    /// Merges `complaint_id` into `incident_id` as one transactional unit:
    /// re-checks the incident is still ACTIVE, inserts the membership
    /// (a duplicate is a no-op, not an error), and recomputes
    /// `complaint_count` from the actual membership rows rather than a
    /// stale read-modify-write, so concurrent merges and job redelivery
    /// can never desynchronize the two. Returns `None` without applying
    /// any change if the incident is missing or no longer ACTIVE (the
    /// clustering race-condition guard); `last_reported_at` is bumped to
    /// `now` only when `now` is later than the stored value, so replaying
    /// the same job twice is a no-op.
    async fn merge_complaint_into_incident(
        &self,
        incident_id: IncidentId,
        complaint_id: ComplaintId,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Incident>>;

    /// Active incidents in `(barangay_id, category_id)` whose
    /// `last_reported_at >= now - window_hours`, ordered by
    /// `last_reported_at` descending.
    async fn list_active_in_window(
        &self,
        barangay_id: BarangayId,
        category_id: CategoryId,
        window_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Incident>>;

    async fn count_memberships_in_window(
        &self,
        incident_id: IncidentId,
        window_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<i64>;

    /// Configured values, or the default `(weight=2.0, window=24h,
    /// threshold=0.65)` for an unconfigured category.
    async fn get_category_config(&self, category_id: CategoryId) -> EngineResult<CategoryConfig>;

    /// Distinct statuses of complaints linked to `incident_id`.
    async fn complaint_statuses_for_incident(
        &self,
        incident_id: IncidentId,
    ) -> EngineResult<Vec<ComplaintStatus>>;

    /// Atomically marks incidents whose `last_reported_at +
    /// time_window_hours <= now` as EXPIRED; returns the expired ids.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> EngineResult<Vec<IncidentId>>;
}
