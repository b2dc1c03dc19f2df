//! Severity Use Case and the velocity window it folds into the weighted
//! formula. Both are pure given the store reads they start from;
//! recomputation is idempotent and last-write-wins under races.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::common::time::band;
use crate::common::utils::round2;
use crate::errors::{EngineError, EngineResult};
use crate::kernel::traits::{CategoryConfig, CategoryId, Incident, IncidentId, IncidentStore};

/// Built-in per-category base-weight fallback, consulted only when
/// `category_configs` has no row for the category: a small built-in
/// table of defaults for unconfigured categories.
/// `IncidentStore::get_category_config`'s own default (2.0) is used when
/// the category isn't in this table either.
const DEFAULT_CATEGORY_WEIGHTS: &[(i64, f64)] = &[
    (1, 3.0),  // noise disturbance
    (2, 4.0),  // illegal dumping
    (3, 3.5),  // road damage
    (4, 2.5),  // street light outage
    (5, 5.0),  // flooding / drainage
    (6, 4.5),  // illegal construction
    (7, 2.0),  // stray animals
    (8, 3.0),  // public intoxication
    (9, 2.5),  // illegal vending
    (10, 4.0), // water supply issue
    (11, 3.5), // garbage collection
    (12, 2.0), // vandalism
];

/// Looks up the built-in fallback weight for a category, or `None` if the
/// category has no built-in entry (the caller then uses the
/// store-provided default).
pub fn default_category_weight(category_id: CategoryId) -> Option<f64> {
    DEFAULT_CATEGORY_WEIGHTS
        .iter()
        .find(|(id, _)| *id == category_id.as_i64())
        .map(|(_, weight)| *weight)
}

/// Resolves the base weight the severity formula uses: a real
/// `category_configs` row always wins; only an unconfigured category falls
/// through to the built-in table, and only then to the store's own
/// scalar default.
fn resolve_base_weight(category_config: &CategoryConfig) -> f64 {
    if category_config.is_configured {
        return category_config.base_severity_weight;
    }
    default_category_weight(category_config.category_id).unwrap_or(category_config.base_severity_weight)
}

/// How many complaints landed on this incident within its own time
/// window, expressed as a rate.
#[derive(Debug, Clone, Copy)]
pub struct VelocityWindow {
    pub window_hours: f64,
    pub complaint_count: i64,
}

impl VelocityWindow {
    pub fn complaints_per_hour(&self) -> f64 {
        if self.window_hours <= 0.0 {
            0.0
        } else {
            self.complaint_count as f64 / self.window_hours
        }
    }
}

/// Computes the velocity window for an incident: count of memberships
/// linked within `incident.time_window_hours` of `now`, divided by the
/// window length.
pub struct VelocityDetector {
    incident_store: Arc<dyn IncidentStore>,
}

impl VelocityDetector {
    pub fn new(incident_store: Arc<dyn IncidentStore>) -> Self {
        Self { incident_store }
    }

    pub async fn get_velocity(
        &self,
        incident: &Incident,
        now: DateTime<Utc>,
    ) -> EngineResult<VelocityWindow> {
        let complaint_count = self
            .incident_store
            .count_memberships_in_window(incident.id, incident.time_window_hours, now)
            .await?;
        Ok(VelocityWindow {
            window_hours: incident.time_window_hours,
            complaint_count,
        })
    }
}

/// Pure weighted-severity formula:
///
/// `raw = base_weight + log2(max(complaint_count, 1)) * 1.5 + velocity * 2.0`
///
/// clamped to `[1.0, 10.0]` and rounded to 2 decimal places. Logarithmic in
/// count (the 10th complaint matters far less than the 2nd), linear in
/// rate, additive on a category-specific baseline.
pub fn calculate_severity(base_weight: f64, complaint_count: i32, velocity: &VelocityWindow) -> f64 {
    let count_weight = (complaint_count.max(1) as f64).log2() * 1.5;
    let velocity_weight = velocity.complaints_per_hour() * 2.0;
    let raw = base_weight + count_weight + velocity_weight;
    round2(raw.clamp(1.0, 10.0))
}

pub struct SeverityUseCase {
    incident_store: Arc<dyn IncidentStore>,
    velocity_detector: VelocityDetector,
}

impl SeverityUseCase {
    pub fn new(incident_store: Arc<dyn IncidentStore>) -> Self {
        let velocity_detector = VelocityDetector::new(Arc::clone(&incident_store));
        Self {
            incident_store,
            velocity_detector,
        }
    }

    #[instrument(skip(self), fields(incident_id = %incident_id))]
    pub async fn execute(&self, incident_id: IncidentId, now: DateTime<Utc>) -> EngineResult<Incident> {
        let mut incident = self
            .incident_store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("incident {incident_id} not found")))?;

        let category_config = self
            .incident_store
            .get_category_config(incident.category_id)
            .await?;
        let base_weight = resolve_base_weight(&category_config);

        let velocity = self.velocity_detector.get_velocity(&incident, now).await?;
        let new_score = calculate_severity(base_weight, incident.complaint_count, &velocity);

        incident.severity_score = new_score;
        incident.severity_level = band(new_score);
        let updated = self.incident_store.update_incident(incident).await?;

        info!(
            incident_id = %incident_id,
            severity_score = updated.severity_score,
            severity_level = %updated.severity_level,
            complaints_per_hour = velocity.complaints_per_hour(),
            "severity recomputed"
        );

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_one_velocity_zero_clamps_to_base_weight() {
        let velocity = VelocityWindow {
            window_hours: 24.0,
            complaint_count: 0,
        };
        assert_eq!(calculate_severity(5.0, 1, &velocity), 5.0);
    }

    #[test]
    fn base_weight_five_count_two_velocity_one_twelfth() {
        // complaint_count=2, velocity = 2/24 complaints/hour, base=5.0
        let velocity = VelocityWindow {
            window_hours: 24.0,
            complaint_count: 2,
        };
        let score = calculate_severity(5.0, 2, &velocity);
        assert_eq!(score, 6.67);
    }

    #[test]
    fn clamps_to_ten() {
        let velocity = VelocityWindow {
            window_hours: 1.0,
            complaint_count: 1000,
        };
        assert_eq!(calculate_severity(5.0, 1000, &velocity), 10.0);
    }

    #[test]
    fn clamps_to_one() {
        let velocity = VelocityWindow {
            window_hours: 24.0,
            complaint_count: 0,
        };
        assert_eq!(calculate_severity(0.1, 1, &velocity), 1.0);
    }

    #[test]
    fn default_category_weight_known_and_unknown() {
        assert_eq!(default_category_weight(CategoryId::new(5)), Some(5.0));
        assert_eq!(default_category_weight(CategoryId::new(999)), None);
    }

    #[test]
    fn configured_weight_overrides_the_builtin_table() {
        // category 5 has a built-in fallback of 5.0, but an explicit
        // category_configs row of 7.0 must win.
        let configured = CategoryConfig {
            category_id: CategoryId::new(5),
            base_severity_weight: 7.0,
            time_window_hours: 24.0,
            similarity_threshold: 0.65,
            is_configured: true,
        };
        assert_eq!(resolve_base_weight(&configured), 7.0);
    }

    #[test]
    fn unconfigured_category_falls_back_to_builtin_table() {
        let unconfigured = CategoryConfig::default_for(CategoryId::new(5));
        assert_eq!(resolve_base_weight(&unconfigured), 5.0);
    }

    #[test]
    fn unconfigured_unknown_category_falls_back_to_store_default() {
        let unconfigured = CategoryConfig::default_for(CategoryId::new(999));
        assert_eq!(resolve_base_weight(&unconfigured), 2.0);
    }
}
