//! Severity banding and time-window helpers shared by the use cases.

use chrono::{DateTime, Utc};

/// Severity tier label for a score already clamped to `[1.0, 10.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeverityLevel::Low => "LOW",
            SeverityLevel::Medium => "MEDIUM",
            SeverityLevel::High => "HIGH",
            SeverityLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Bands LOW<4, MEDIUM<6, HIGH<8, CRITICAL>=8.
pub fn band(severity_score: f64) -> SeverityLevel {
    if severity_score < 4.0 {
        SeverityLevel::Low
    } else if severity_score < 6.0 {
        SeverityLevel::Medium
    } else if severity_score < 8.0 {
        SeverityLevel::High
    } else {
        SeverityLevel::Critical
    }
}

/// `true` iff `last_reported_at + time_window_hours >= now`.
pub fn is_within_window(
    last_reported_at: DateTime<Utc>,
    time_window_hours: f64,
    now: DateTime<Utc>,
) -> bool {
    let deadline = last_reported_at + chrono::Duration::seconds((time_window_hours * 3600.0) as i64);
    deadline >= now
}

/// The cutoff timestamp for "last_reported_at >= now - window_hours" queries.
pub fn window_cutoff(now: DateTime<Utc>, window_hours: f64) -> DateTime<Utc> {
    now - chrono::Duration::seconds((window_hours * 3600.0) as i64)
}
