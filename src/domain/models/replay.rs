//! Historical log records for offline replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::context::Context;

/// One logged serve+reward record from a production log, as ingested by
/// `load_logs`. The logging policy's propensity is carried for IPS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub event_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub context: Context,
    pub arm_id: String,
    /// Propensity the logging policy recorded for `arm_id`.
    pub propensity: f64,
    /// Final attributed reward.
    pub reward: f64,
    pub at: DateTime<Utc>,
}

impl LoggedEvent {
    /// Logged propensities must be in (0, 1] to be usable as IPS weights.
    pub fn is_valid(&self) -> bool {
        self.propensity > 0.0 && self.propensity <= 1.0 && self.reward.is_finite()
    }
}
