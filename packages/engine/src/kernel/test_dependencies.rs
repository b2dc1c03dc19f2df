// TestDependencies - in-memory fakes for the engine's capability traits.
//
// Lets the use cases in `domains::incidents` be exercised without a live
// Postgres, embedding provider, or LLM. Not cfg(test)-gated so integration
// tests in other crates/binaries can build on them too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::{EngineError, EngineResult};
use crate::kernel::traits::{
    Arbiter, BarangayId, CategoryConfig, CategoryId, ComplaintId, ComplaintStatus,
    ComplaintVectorMeta, Embedder, Incident, IncidentId, IncidentMembership, IncidentStatus,
    IncidentStore, MembershipId, MetadataPatch, SimilarityCandidate, StoredVector, VectorStore,
};

/// Deterministic fake embedder: hashes the trimmed text into a unit vector
/// of the configured dimension. Same text always yields the same vector,
/// matching the "deterministic modulo model version" contract.
pub struct FakeEmbedder {
    dimension: usize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput(
                "description must be non-empty after trimming".to_string(),
            ));
        }

        let mut v = vec![0f32; self.dimension];
        for (i, byte) in trimmed.bytes().enumerate() {
            v[i % self.dimension] += byte as f32;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scripted arbiter: returns canned answers in order, or a fixed default
/// if the script runs out. Records every call for assertions.
pub struct ScriptedArbiter {
    answers: Mutex<Vec<bool>>,
    default_answer: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedArbiter {
    pub fn new(default_answer: bool) -> Self {
        Self {
            answers: Mutex::new(Vec::new()),
            default_answer,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_answers(answers: Vec<bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().rev().collect()),
            default_answer: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Arbiter for ScriptedArbiter {
    async fn same_incident(&self, complaint_a: &str, complaint_b: &str) -> EngineResult<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((complaint_a.to_string(), complaint_b.to_string()));
        let mut answers = self.answers.lock().unwrap();
        Ok(answers.pop().unwrap_or(self.default_answer))
    }
}

/// An arbiter that always errors, to exercise the "LLM errors degrade to
/// NO" path.
pub struct FailingArbiter;

#[async_trait]
impl Arbiter for FailingArbiter {
    async fn same_incident(&self, _a: &str, _b: &str) -> EngineResult<bool> {
        Err(EngineError::TransientExternal("arbiter unavailable".to_string()))
    }
}

#[derive(Default)]
struct VectorRow {
    embedding: Vec<f32>,
    meta: ComplaintVectorMetaOwned,
}

#[derive(Clone)]
struct ComplaintVectorMetaOwned {
    complaint_id: ComplaintId,
    barangay_id: BarangayId,
    category_id: CategoryId,
    incident_id: Option<IncidentId>,
    status: IncidentStatus,
    created_at: DateTime<Utc>,
}

impl Default for ComplaintVectorMetaOwned {
    fn default() -> Self {
        Self {
            complaint_id: ComplaintId::new(0),
            barangay_id: BarangayId::new(0),
            category_id: CategoryId::new(0),
            incident_id: None,
            status: IncidentStatus::Active,
            created_at: Utc::now(),
        }
    }
}

/// In-memory `VectorStore`: a `Vec` of rows guarded by a `Mutex`, good
/// enough to exercise `query_similar`'s filtering/ordering contract in unit
/// tests without pgvector.
pub struct InMemoryVectorStore {
    rows: Mutex<HashMap<i64, VectorRow>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        complaint_id: ComplaintId,
        embedding: &[f32],
        meta: ComplaintVectorMeta,
    ) -> EngineResult<()> {
        self.rows.lock().unwrap().insert(
            complaint_id.as_i64(),
            VectorRow {
                embedding: embedding.to_vec(),
                meta: ComplaintVectorMetaOwned {
                    complaint_id: meta.complaint_id,
                    barangay_id: meta.barangay_id,
                    category_id: meta.category_id,
                    incident_id: meta.incident_id,
                    status: meta.status,
                    created_at: meta.created_at,
                },
            },
        );
        Ok(())
    }

    async fn query_similar(
        &self,
        query_vec: &[f32],
        barangay_id: BarangayId,
        category_id: CategoryId,
        since: DateTime<Utc>,
        top_k: usize,
    ) -> EngineResult<Vec<SimilarityCandidate>> {
        let rows = self.rows.lock().unwrap();
        let mut candidates: Vec<SimilarityCandidate> = rows
            .values()
            .filter(|row| {
                row.meta.barangay_id == barangay_id
                    && row.meta.category_id == category_id
                    && row.meta.status == IncidentStatus::Active
                    && row.meta.created_at >= since
            })
            .map(|row| SimilarityCandidate {
                complaint_id: row.meta.complaint_id,
                incident_id: row.meta.incident_id,
                score: crate::kernel::traits::compute_similarity(query_vec, &row.embedding),
                created_at: row.meta.created_at,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then(b.created_at.cmp(&a.created_at))
                .then(b.complaint_id.as_i64().cmp(&a.complaint_id.as_i64()))
        });
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn fetch_incident_vector(
        &self,
        incident_id: IncidentId,
    ) -> EngineResult<Option<StoredVector>> {
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<&VectorRow> = rows
            .values()
            .filter(|row| row.meta.incident_id == Some(incident_id))
            .collect();
        matching.sort_by_key(|row| row.meta.created_at);
        Ok(matching.first().map(|row| StoredVector {
            embedding: row.embedding.clone(),
            meta: ComplaintVectorMeta {
                complaint_id: row.meta.complaint_id,
                barangay_id: row.meta.barangay_id,
                category_id: row.meta.category_id,
                incident_id: row.meta.incident_id,
                status: row.meta.status,
                created_at: row.meta.created_at,
            },
        }))
    }

    async fn batch_fetch_incident_vectors(
        &self,
        incident_ids: &[IncidentId],
    ) -> EngineResult<HashMap<IncidentId, StoredVector>> {
        let mut out = HashMap::new();
        for &id in incident_ids {
            if let Some(v) = self.fetch_incident_vector(id).await? {
                out.insert(id, v);
            }
        }
        Ok(out)
    }

    async fn update_metadata(
        &self,
        complaint_id: ComplaintId,
        patch: MetadataPatch,
    ) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&complaint_id.as_i64()) {
            if let Some(incident_id) = patch.incident_id {
                row.meta.incident_id = Some(incident_id);
            }
            if let Some(status) = patch.status {
                row.meta.status = status;
            }
        }
        Ok(())
    }

    async fn update_status_by_incident(
        &self,
        incident_id: IncidentId,
        status: IncidentStatus,
    ) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.values_mut() {
            if row.meta.incident_id == Some(incident_id) {
                row.meta.status = status;
            }
        }
        Ok(())
    }
}

struct IncidentStoreState {
    incidents: HashMap<i64, Incident>,
    memberships: Vec<IncidentMembership>,
    complaint_statuses: HashMap<i64, ComplaintStatus>,
    category_configs: HashMap<i64, CategoryConfig>,
    next_incident_id: i64,
    next_membership_id: i64,
}

/// In-memory `IncidentStore`. Good enough to unit-test the clustering and
/// severity use cases' control flow (merge/create/race-guard, velocity
/// windows) without a Postgres instance.
pub struct InMemoryIncidentStore {
    state: Mutex<IncidentStoreState>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IncidentStoreState {
                incidents: HashMap::new(),
                memberships: Vec::new(),
                complaint_statuses: HashMap::new(),
                category_configs: HashMap::new(),
                next_incident_id: 1,
                next_membership_id: 1,
            }),
        }
    }

    pub fn set_category_config(&self, mut config: CategoryConfig) {
        config.is_configured = true;
        self.state
            .lock()
            .unwrap()
            .category_configs
            .insert(config.category_id.as_i64(), config);
    }

    pub fn set_complaint_status(&self, complaint_id: ComplaintId, status: ComplaintStatus) {
        self.state
            .lock()
            .unwrap()
            .complaint_statuses
            .insert(complaint_id.as_i64(), status);
    }

    /// Test-only helper to force an incident's status, used to exercise
    /// the clustering race-condition guard when a candidate expires
    /// between scoring and merge.
    pub fn force_status(&self, incident_id: IncidentId, status: IncidentStatus) {
        if let Some(incident) = self
            .state
            .lock()
            .unwrap()
            .incidents
            .get_mut(&incident_id.as_i64())
        {
            incident.status = status;
        }
    }
}

impl Default for InMemoryIncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn get_incident(&self, id: IncidentId) -> EngineResult<Option<Incident>> {
        Ok(self.state.lock().unwrap().incidents.get(&id.as_i64()).cloned())
    }

    async fn create_incident(&self, mut incident: Incident) -> EngineResult<Incident> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_incident_id;
        state.next_incident_id += 1;
        incident.id = IncidentId::new(id);
        state.incidents.insert(id, incident.clone());
        Ok(incident)
    }

    async fn update_incident(&self, incident: Incident) -> EngineResult<Incident> {
        let mut state = self.state.lock().unwrap();
        if !state.incidents.contains_key(&incident.id.as_i64()) {
            return Err(EngineError::NotFound(format!(
                "incident {} not found",
                incident.id
            )));
        }
        state.incidents.insert(incident.id.as_i64(), incident.clone());
        Ok(incident)
    }

    async fn link_complaint(
        &self,
        incident_id: IncidentId,
        complaint_id: ComplaintId,
        similarity_score: f64,
    ) -> EngineResult<IncidentMembership> {
        let mut state = self.state.lock().unwrap();
        if state
            .memberships
            .iter()
            .any(|m| m.incident_id == incident_id && m.complaint_id == complaint_id)
        {
            return Err(EngineError::Conflict(format!(
                "complaint {complaint_id} already linked to incident {incident_id}"
            )));
        }
        let id = state.next_membership_id;
        state.next_membership_id += 1;
        let membership = IncidentMembership {
            id: MembershipId::new(id),
            incident_id,
            complaint_id,
            similarity_score,
            linked_at: Utc::now(),
        };
        state.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn merge_complaint_into_incident(
        &self,
        incident_id: IncidentId,
        complaint_id: ComplaintId,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Incident>> {
        let mut state = self.state.lock().unwrap();

        let is_active = matches!(
            state.incidents.get(&incident_id.as_i64()),
            Some(incident) if incident.status == IncidentStatus::Active
        );
        if !is_active {
            return Ok(None);
        }

        let already_linked = state
            .memberships
            .iter()
            .any(|m| m.incident_id == incident_id && m.complaint_id == complaint_id);
        if !already_linked {
            let id = state.next_membership_id;
            state.next_membership_id += 1;
            state.memberships.push(IncidentMembership {
                id: MembershipId::new(id),
                incident_id,
                complaint_id,
                similarity_score,
                linked_at: now,
            });
        }

        let complaint_count = state
            .memberships
            .iter()
            .filter(|m| m.incident_id == incident_id)
            .count() as i32;

        let incident = state
            .incidents
            .get_mut(&incident_id.as_i64())
            .expect("checked active above");
        incident.complaint_count = complaint_count;
        if now > incident.last_reported_at {
            incident.last_reported_at = now;
        }
        Ok(Some(incident.clone()))
    }

    async fn list_active_in_window(
        &self,
        barangay_id: BarangayId,
        category_id: CategoryId,
        window_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Incident>> {
        let cutoff = now - chrono::Duration::seconds((window_hours * 3600.0) as i64);
        let state = self.state.lock().unwrap();
        let mut out: Vec<Incident> = state
            .incidents
            .values()
            .filter(|i| {
                i.barangay_id == barangay_id
                    && i.category_id == category_id
                    && i.status == IncidentStatus::Active
                    && i.last_reported_at >= cutoff
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_reported_at.cmp(&a.last_reported_at));
        Ok(out)
    }

    async fn count_memberships_in_window(
        &self,
        incident_id: IncidentId,
        window_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let cutoff = now - chrono::Duration::seconds((window_hours * 3600.0) as i64);
        let state = self.state.lock().unwrap();
        Ok(state
            .memberships
            .iter()
            .filter(|m| m.incident_id == incident_id && m.linked_at >= cutoff)
            .count() as i64)
    }

    async fn get_category_config(&self, category_id: CategoryId) -> EngineResult<CategoryConfig> {
        let state = self.state.lock().unwrap();
        Ok(state
            .category_configs
            .get(&category_id.as_i64())
            .copied()
            .unwrap_or_else(|| CategoryConfig::default_for(category_id)))
    }

    async fn complaint_statuses_for_incident(
        &self,
        incident_id: IncidentId,
    ) -> EngineResult<Vec<ComplaintStatus>> {
        let state = self.state.lock().unwrap();
        let mut statuses: Vec<ComplaintStatus> = state
            .memberships
            .iter()
            .filter(|m| m.incident_id == incident_id)
            .filter_map(|m| state.complaint_statuses.get(&m.complaint_id.as_i64()).copied())
            .collect();
        statuses.dedup();
        Ok(statuses)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> EngineResult<Vec<IncidentId>> {
        let mut state = self.state.lock().unwrap();
        let mut expired = Vec::new();
        for incident in state.incidents.values_mut() {
            if incident.status == IncidentStatus::Active {
                let deadline = incident.last_reported_at
                    + chrono::Duration::seconds((incident.time_window_hours * 3600.0) as i64);
                if deadline <= now {
                    incident.status = IncidentStatus::Expired;
                    expired.push(incident.id);
                }
            }
        }
        Ok(expired)
    }
}

/// Spy job queue: records every enqueued job for assertions instead of
/// persisting to Postgres. Used by worker/use-case tests that only need to
/// verify *that* a follow-up job was enqueued (e.g. clustering enqueuing a
/// severity recompute), not that it actually ran.
pub struct SpyEngineJobQueue {
    jobs: Arc<Mutex<Vec<crate::jobs::model::EngineJob>>>,
}

impl SpyEngineJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn enqueued(&self) -> Vec<crate::jobs::model::EngineJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl Default for SpyEngineJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::jobs::queue::JobQueue for SpyEngineJobQueue {
    async fn enqueue(&self, job: crate::jobs::model::EngineJob) -> EngineResult<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
