//! Policy state snapshots for persistence and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ArmState;
use crate::domain::policy::StateView;

/// Serialized view of one (experiment, policy, context) state slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub experiment_id: Uuid,
    pub policy_id: String,
    pub context_key: String,
    pub arms: Vec<ArmState>,
    pub taken_at: DateTime<Utc>,
}

impl PolicySnapshot {
    /// Capture a state view. Arms are sorted by id so snapshots of the same
    /// state are byte-identical.
    pub fn capture(
        experiment_id: Uuid,
        policy_id: impl Into<String>,
        context_key: impl Into<String>,
        view: &StateView,
    ) -> Self {
        let mut arms: Vec<ArmState> = view.iter().cloned().collect();
        arms.sort_by(|a, b| a.key.arm_id.cmp(&b.key.arm_id));
        Self {
            experiment_id,
            policy_id: policy_id.into(),
            context_key: context_key.into(),
            arms,
            taken_at: Utc::now(),
        }
    }

    /// Rebuild the state view, validating every row.
    pub fn restore(&self) -> DomainResult<StateView> {
        for arm in &self.arms {
            arm.validate()?;
        }
        Ok(StateView::new(self.arms.iter().cloned()))
    }
}
