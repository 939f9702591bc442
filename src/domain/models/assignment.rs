//! User-to-policy assignment model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of routing a user against an experiment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    /// Bucket fell outside the traffic fraction; serve the default policy.
    OutOfExperiment { bucket: f64 },
    /// Bucket landed on a policy in the traffic plan.
    Assigned { policy_id: String, bucket: f64 },
}

impl AssignmentOutcome {
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            Self::Assigned { policy_id, .. } => Some(policy_id),
            Self::OutOfExperiment { .. } => None,
        }
    }

    pub fn bucket(&self) -> f64 {
        match self {
            Self::Assigned { bucket, .. } | Self::OutOfExperiment { bucket } => *bucket,
        }
    }
}

/// Memoized assignment row. The hash function is the source of truth; these
/// rows exist for audit and for policy stickiness under ramp (first write
/// wins per (user, experiment)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub user_id: String,
    pub experiment_id: Uuid,
    pub policy_id: String,
    pub bucket: f64,
    /// Salt the bucket was computed under. A salt change invalidates the row.
    pub salt: String,
    pub sticky: bool,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(
        user_id: impl Into<String>,
        experiment_id: Uuid,
        policy_id: impl Into<String>,
        bucket: f64,
        salt: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            experiment_id,
            policy_id: policy_id.into(),
            bucket,
            salt: salt.into(),
            sticky: true,
            assigned_at: Utc::now(),
        }
    }
}
