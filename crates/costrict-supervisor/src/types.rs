//! `Check`'s aggregate health report.

use serde::{Deserialize, Serialize};

/// Overall verdict for a [`HealthSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No failed checks.
    Healthy,
    /// Some checks failed, but fewer than half.
    Warning,
    /// At least half of all checks failed.
    Error,
}

/// A point-in-time rollup of every service and component check, returned
/// by [`crate::Supervisor::check`] and surfaced at the HTTP control
/// surface's `/healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub state: HealthState,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}
