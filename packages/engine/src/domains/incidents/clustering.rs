//! Clustering Use Case: assigns a new complaint to an already-active
//! incident, or creates a new one, by combining vector similarity search
//! with category/locality/time-window filters and an LLM arbitration
//! step.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::common::time::band;
use crate::domains::incidents::dto::{ClusterInput, ClusterResult};
use crate::errors::EngineResult;
use crate::kernel::traits::{
    Arbiter, ComplaintStatus, ComplaintVectorMeta, Embedder, Incident, IncidentId,
    IncidentStatus, IncidentStore, MetadataPatch, VectorStore,
};

/// Confidence band a candidate's similarity score falls into. Tracked
/// mainly for telemetry: both non-reject bands share the same LLM
/// yes/no contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfidenceBand {
    High,
    Ambiguous,
    Reject,
}

/// Tolerance used for all floating-point comparisons in the band decision
/// and tie-breaking.
const EPSILON: f64 = 1e-9;

fn confidence_band(best_score: f64, threshold: f64) -> ConfidenceBand {
    if best_score >= threshold + 0.10 - EPSILON {
        ConfidenceBand::High
    } else if best_score >= threshold - EPSILON {
        ConfidenceBand::Ambiguous
    } else {
        ConfidenceBand::Reject
    }
}

/// A scored candidate incident, carrying just enough to apply the
/// tie-breaking rule (highest score, then latest `last_reported_at`, then
/// smallest incident id).
struct ScoredCandidate {
    incident: Incident,
    score: f64,
}

fn better(a: &ScoredCandidate, b: &ScoredCandidate) -> bool {
    if (a.score - b.score).abs() > EPSILON {
        return a.score > b.score;
    }
    if a.incident.last_reported_at != b.incident.last_reported_at {
        return a.incident.last_reported_at > b.incident.last_reported_at;
    }
    a.incident.id < b.incident.id
}

pub struct ClusteringUseCase {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    incident_store: Arc<dyn IncidentStore>,
    arbiter: Arc<dyn Arbiter>,
}

impl ClusteringUseCase {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        incident_store: Arc<dyn IncidentStore>,
        arbiter: Arc<dyn Arbiter>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            incident_store,
            arbiter,
        }
    }

    #[instrument(skip(self, input), fields(complaint_id = %input.complaint_id))]
    pub async fn execute(&self, input: ClusterInput) -> EngineResult<ClusterResult> {
        // 1. Embed the description.
        let query_vec = self.embedder.embed(&input.description).await?;

        // 2. Candidate discovery from the relational store (source of
        // truth, to avoid vector-store/metadata drift).
        let candidates = self
            .incident_store
            .list_active_in_window(
                input.barangay_id,
                input.category_id,
                input.window_hours,
                input.created_at,
            )
            .await?;

        // 3. Score each candidate against its seed vector; skip any with
        // no seed vector on file.
        let mut best: Option<ScoredCandidate> = None;
        for candidate in candidates {
            let Some(seed) = self
                .vector_store
                .fetch_incident_vector(candidate.id)
                .await?
            else {
                continue;
            };
            let score = crate::kernel::traits::compute_similarity(&query_vec, &seed.embedding);
            let scored = ScoredCandidate {
                incident: candidate,
                score,
            };
            best = match best {
                Some(current) if !better(&scored, &current) => Some(current),
                _ => Some(scored),
            };
        }

        let decision = match best {
            None => Decision::Create,
            Some(scored) => {
                let band = confidence_band(scored.score, input.threshold);
                match band {
                    ConfidenceBand::Reject => Decision::Create,
                    ConfidenceBand::High | ConfidenceBand::Ambiguous => {
                        let same = self
                            .arbiter
                            .same_incident(&scored.incident.description, &input.description)
                            .await
                            .unwrap_or_else(|err| {
                                // LLM errors degrade to NO: bias toward new-incident
                                // creation so the system stays live during arbiter
                                // outages.
                                warn!(error = %err, "arbiter call failed, treating as NO");
                                false
                            });
                        if same {
                            Decision::Merge {
                                incident_id: scored.incident.id,
                                score: scored.score,
                            }
                        } else {
                            Decision::Create
                        }
                    }
                }
            }
        };

        // 5. Apply the decision.
        let (incident, is_new, similarity_score) = match decision {
            Decision::Merge { incident_id, score } => {
                match self.try_merge(incident_id, score, &input).await? {
                    Some(incident) => (incident, false, score),
                    // Race-condition guard: the candidate went non-ACTIVE
                    // between scoring and merge. Fall through to create.
                    None => {
                        warn!(
                            incident_id = %incident_id,
                            "candidate incident no longer active, creating new incident"
                        );
                        (self.create_incident(&input).await?, true, 1.0)
                    }
                }
            }
            Decision::Create => (self.create_incident(&input).await?, true, 1.0),
        };

        // 6. Vector upsert for the new complaint, after commit (idempotent).
        self.vector_store
            .upsert(
                input.complaint_id,
                &query_vec,
                ComplaintVectorMeta {
                    complaint_id: input.complaint_id,
                    barangay_id: input.barangay_id,
                    category_id: input.category_id,
                    incident_id: Some(incident.id),
                    status: IncidentStatus::Active,
                    created_at: input.created_at,
                },
            )
            .await?;

        // 7. Compose the user-facing message/status.
        let (existing_incident_status, message) = if is_new {
            (None, None)
        } else {
            let statuses = self
                .incident_store
                .complaint_statuses_for_incident(incident.id)
                .await?;
            let most_urgent = ComplaintStatus::most_urgent(&statuses);
            let status_str = most_urgent.map(status_label);
            let message = status_str
                .as_ref()
                .map(|s| format!("This matches an existing incident, currently {s}."));
            (status_str, message)
        };

        info!(
            incident_id = %incident.id,
            is_new_incident = is_new,
            similarity_score,
            severity_level = %incident.severity_level,
            "clustering decision applied"
        );

        Ok(ClusterResult {
            incident_id: incident.id,
            is_new_incident: is_new,
            similarity_score,
            severity_level: incident.severity_level,
            existing_incident_status,
            message,
        })
    }

    /// Merges the complaint into the candidate incident as one
    /// transactional unit (membership insert + `complaint_count`/
    /// `last_reported_at` update), re-checking ACTIVE status as part of
    /// that same unit. Returns `None` if the race-condition guard fires
    /// (the incident is missing or no longer ACTIVE). Idempotent: a
    /// redelivered job lands on the same membership row and the same
    /// derived `complaint_count`.
    async fn try_merge(
        &self,
        incident_id: IncidentId,
        score: f64,
        input: &ClusterInput,
    ) -> EngineResult<Option<Incident>> {
        self.incident_store
            .merge_complaint_into_incident(incident_id, input.complaint_id, score, input.created_at)
            .await
    }

    async fn create_incident(&self, input: &ClusterInput) -> EngineResult<Incident> {
        let now = input.created_at;
        let severity_score = input.base_weight;
        let incident = Incident {
            id: IncidentId::new(0), // assigned by the store on create
            title: input.title.clone(),
            description: input.description.clone(),
            barangay_id: input.barangay_id,
            category_id: input.category_id,
            status: IncidentStatus::Active,
            complaint_count: 1,
            severity_score,
            severity_level: band(severity_score),
            time_window_hours: input.window_hours,
            first_reported_at: now,
            last_reported_at: now,
        };
        let created = self.incident_store.create_incident(incident).await?;

        match self
            .incident_store
            .link_complaint(created.id, input.complaint_id, 1.0)
            .await
        {
            Ok(_) => {}
            Err(err) if matches!(err, crate::errors::EngineError::Conflict(_)) => {}
            Err(err) => return Err(err),
        }

        Ok(created)
    }
}

enum Decision {
    Merge { incident_id: IncidentId, score: f64 },
    Create,
}

fn status_label(status: ComplaintStatus) -> String {
    match status {
        ComplaintStatus::Submitted => "submitted",
        ComplaintStatus::UnderReview => "under_review",
        ComplaintStatus::ForwardedToLgu => "forwarded_to_lgu",
        ComplaintStatus::ForwardedToDepartment => "forwarded_to_department",
        ComplaintStatus::Resolved => "resolved",
    }
    .to_string()
}
