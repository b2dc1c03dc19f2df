//! Lifecycle Scheduler: a periodic sweep that expires incidents past their
//! time window and propagates the status to the vector store. Failures
//! propagating a single incident's status must not block the others — the
//! sweep is eventually consistent and safe to rerun.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use crate::errors::EngineResult;
use crate::kernel::traits::{IncidentId, IncidentStatus, IncidentStore, VectorStore};

pub struct LifecycleScheduler {
    incident_store: Arc<dyn IncidentStore>,
    vector_store: Arc<dyn VectorStore>,
}

impl LifecycleScheduler {
    pub fn new(incident_store: Arc<dyn IncidentStore>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            incident_store,
            vector_store,
        }
    }

    /// Runs one sweep: expires overdue incidents in the relational store
    /// (the authoritative transition), then best-effort propagates the
    /// new status to every vector pointing at each expired incident.
    /// Returns the ids that were expired this tick.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> EngineResult<Vec<IncidentId>> {
        let expired = self.incident_store.expire_overdue(now).await?;

        if expired.is_empty() {
            info!("lifecycle sweep: nothing to expire");
            return Ok(expired);
        }

        info!(count = expired.len(), "lifecycle sweep: expiring incidents");

        for &incident_id in &expired {
            if let Err(err) = self
                .vector_store
                .update_status_by_incident(incident_id, IncidentStatus::Expired)
                .await
            {
                // A single incident's vector propagation failing must not
                // block the others; the next sweep retries it since the
                // relational status is already EXPIRED and the vector
                // update is idempotent.
                error!(
                    incident_id = %incident_id,
                    error = %err,
                    "failed to propagate EXPIRED status to vector store"
                );
            }
        }

        Ok(expired)
    }
}
