//! Per-(experiment, policy, arm, context) sufficient statistics.
//!
//! One row per composite key; rows are updated atomically with an optimistic
//! version and counters only ever grow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::policy::PolicyKind;

/// Composite key for a sufficient-statistics row.
///
/// `context_key` is empty for non-contextual policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub experiment_id: Uuid,
    pub policy_id: String,
    pub arm_id: String,
    pub context_key: String,
}

impl StateKey {
    pub fn new(
        experiment_id: Uuid,
        policy_id: impl Into<String>,
        arm_id: impl Into<String>,
        context_key: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id,
            policy_id: policy_id.into(),
            arm_id: arm_id.into(),
            context_key: context_key.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.experiment_id, self.policy_id, self.arm_id, self.context_key
        )
    }
}

/// Sufficient statistics for one arm under one policy.
///
/// `successes`/`failures` carry fractional mass so that the Beta posterior
/// identities `alpha = alpha0 + successes` and `beta = beta0 + failures`
/// hold for continuous rewards as well as binary ones. For non-Thompson
/// policies they count sign-classified outcomes and `alpha`/`beta` stay at
/// their seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    pub key: StateKey,
    pub pulls: i64,
    pub successes: f64,
    pub failures: f64,
    pub sum_reward: f64,
    pub sum_reward_sq: f64,
    pub alpha: f64,
    pub beta: f64,
    /// Optimistic concurrency version, bumped on every write.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl ArmState {
    /// Seed a fresh row with priors.
    pub fn seeded(key: StateKey, alpha0: f64, beta0: f64) -> Self {
        Self {
            key,
            pulls: 0,
            successes: 0.0,
            failures: 0.0,
            sum_reward: 0.0,
            sum_reward_sq: 0.0,
            alpha: alpha0,
            beta: beta0,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Mean observed reward, zero before the first pull.
    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.sum_reward / self.pulls as f64
        }
    }

    /// Pulls with a reward in neither the success nor the failure band.
    pub fn neutrals(&self) -> f64 {
        (self.pulls as f64 - self.successes - self.failures).max(0.0)
    }

    /// Fold one attributed reward into the statistics.
    ///
    /// Thompson requires `reward` in [0, 1] and performs the fractional
    /// Beta update. Other kinds accept any finite reward and classify it by
    /// sign. Counters are monotone in every branch.
    pub fn apply_reward(&mut self, kind: PolicyKind, reward: f64) -> DomainResult<()> {
        if !reward.is_finite() {
            return Err(DomainError::RewardOutOfRange {
                kind: kind.as_str().to_string(),
                value: reward,
            });
        }
        match kind {
            PolicyKind::Thompson => {
                if !(0.0..=1.0).contains(&reward) {
                    return Err(DomainError::RewardOutOfRange {
                        kind: kind.as_str().to_string(),
                        value: reward,
                    });
                }
                self.successes += reward;
                self.failures += 1.0 - reward;
                self.alpha += reward;
                self.beta += 1.0 - reward;
            }
            PolicyKind::EGreedy | PolicyKind::Ucb | PolicyKind::Control => {
                if reward > 0.0 {
                    self.successes += 1.0;
                } else if reward < 0.0 {
                    self.failures += 1.0;
                }
            }
        }
        self.pulls += 1;
        self.sum_reward += reward;
        self.sum_reward_sq += reward * reward;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Sanity check used when loading snapshots.
    pub fn validate(&self) -> DomainResult<()> {
        if self.alpha <= 0.0 || self.beta <= 0.0 {
            return Err(DomainError::InvalidState(format!(
                "non-positive beta parameters on {} (alpha={}, beta={})",
                self.key, self.alpha, self.beta
            )));
        }
        if self.pulls < 0 || self.successes < 0.0 || self.failures < 0.0 {
            return Err(DomainError::InvalidState(format!(
                "negative counters on {}",
                self.key
            )));
        }
        if (self.pulls as f64) + 1e-9 < self.successes || (self.pulls as f64) + 1e-9 < self.failures {
            return Err(DomainError::InvalidState(format!(
                "counters exceed pulls on {}",
                self.key
            )));
        }
        Ok(())
    }
}
