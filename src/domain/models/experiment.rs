//! Experiment domain model.
//!
//! An experiment owns a traffic plan over policies, a pinned arm catalog
//! version, and the lifecycle state machine that gates serving.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::decision::DecisionConfig;
use crate::domain::models::guardrail::GuardrailConfig;

/// Tolerance when checking that traffic plan shares sum to one.
pub const SHARE_SUM_TOLERANCE: f64 = 1e-9;

/// Status of an experiment in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Experiment is defined but not admitting traffic
    Draft,
    /// Experiment is serving and admitting new assignments
    Active,
    /// Experiment is temporarily not serving (admin-initiated)
    Paused,
    /// Experiment finished normally
    Ended,
    /// Experiment was rolled back by an admin or the guardrail monitor
    Killed,
}

impl Default for ExperimentStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
            Self::Killed => "killed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "ended" => Some(Self::Ended),
            "killed" => Some(Self::Killed),
            _ => None,
        }
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [ExperimentStatus] {
        match self {
            Self::Draft => &[Self::Active],
            Self::Active => &[Self::Paused, Self::Ended, Self::Killed],
            Self::Paused => &[Self::Active, Self::Ended, Self::Killed],
            Self::Ended | Self::Killed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Check if this is a terminal state. No serves are recorded afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Killed)
    }

    /// Check if the experiment admits assignments and records serves.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// How downstream signals are composed into a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMapping {
    /// Click => 1.0, otherwise 0.0. Ratings and thumbs are ignored.
    BinaryClick,
    /// Rating mapped to [-1, 1]; non-rating signals are ignored.
    ScaledRating,
    /// Highest-priority signal wins: rating > thumbs > click.
    Composite,
}

impl Default for RewardMapping {
    fn default() -> Self {
        Self::Composite
    }
}

impl RewardMapping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinaryClick => "binary_click",
            Self::ScaledRating => "scaled_rating",
            Self::Composite => "composite",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binary_click" => Some(Self::BinaryClick),
            "scaled_rating" => Some(Self::ScaledRating),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }
}

/// One ordered entry of a traffic plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficShare {
    pub policy_id: String,
    pub share: f64,
}

/// Ordered split of in-experiment traffic across policies.
///
/// Order matters: the cumulative walk over shares determines which policy a
/// normalized bucket lands in, so reordering entries reshuffles users.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrafficPlan {
    pub entries: Vec<TrafficShare>,
}

impl TrafficPlan {
    pub fn new(entries: Vec<(String, f64)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(policy_id, share)| TrafficShare { policy_id, share })
                .collect(),
        }
    }

    /// Validate that shares are non-negative and sum to one.
    pub fn validate(&self) -> DomainResult<()> {
        if self.entries.is_empty() {
            return Err(DomainError::Configuration(
                "traffic plan must have at least one policy".to_string(),
            ));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.share < 0.0) {
            return Err(DomainError::Configuration(format!(
                "traffic share for {} is negative",
                entry.policy_id
            )));
        }
        let sum: f64 = self.entries.iter().map(|e| e.share).sum();
        if (sum - 1.0).abs() > SHARE_SUM_TOLERANCE {
            return Err(DomainError::Configuration(format!(
                "traffic plan shares sum to {sum}, expected 1"
            )));
        }
        Ok(())
    }

    /// Walk the ordered shares cumulatively; the first cumulative share
    /// exceeding `position` wins. `position` must be in [0, 1).
    pub fn policy_for(&self, position: f64) -> Option<&str> {
        let mut cumulative = 0.0;
        for entry in &self.entries {
            cumulative += entry.share;
            if position < cumulative {
                return Some(&entry.policy_id);
            }
        }
        // Guard against accumulated float error at position ~= 1.0.
        self.entries.last().map(|e| e.policy_id.as_str())
    }

    pub fn share_of(&self, policy_id: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.policy_id == policy_id)
            .map(|e| e.share)
    }

    pub fn policy_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.policy_id.as_str())
    }
}

/// An experiment over a set of policies on one serving surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub status: ExperimentStatus,
    /// Serving surface this experiment applies to (e.g. "home_feed").
    pub surface: String,
    /// Higher priority wins when several experiments match a surface.
    pub priority: i32,
    /// Hash salt for assignment. Changing it resets assignments.
    pub salt: String,
    /// Fraction of surface traffic admitted into the experiment.
    pub traffic_fraction: f64,
    pub traffic_plan: TrafficPlan,
    /// Policy served to out-of-experiment users, and the fallback target.
    pub default_policy_id: String,
    /// Pinned arm catalog version.
    pub catalog_version: i64,
    /// Context keys recognized for contextual policies; unknown keys are ignored.
    pub recognized_context_keys: Vec<String>,
    pub attribution_window_secs: i64,
    pub reward_mapping: RewardMapping,
    pub guardrail_config: GuardrailConfig,
    pub decision_config: DecisionConfig,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create a draft experiment with defaults for the optional knobs.
    pub fn new(
        name: impl Into<String>,
        surface: impl Into<String>,
        salt: impl Into<String>,
        traffic_fraction: f64,
        traffic_plan: TrafficPlan,
        default_policy_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: ExperimentStatus::Draft,
            surface: surface.into(),
            priority: 0,
            salt: salt.into(),
            traffic_fraction,
            traffic_plan,
            default_policy_id: default_policy_id.into(),
            catalog_version: 1,
            recognized_context_keys: Vec::new(),
            attribution_window_secs: 24 * 3600,
            reward_mapping: RewardMapping::default(),
            guardrail_config: GuardrailConfig::default(),
            decision_config: DecisionConfig::default(),
            start_at: None,
            end_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate invariants that must hold before the experiment may serve.
    pub fn validate(&self) -> DomainResult<()> {
        if self.salt.is_empty() {
            return Err(DomainError::Configuration("salt must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.traffic_fraction) {
            return Err(DomainError::Configuration(format!(
                "traffic_fraction {} outside [0, 1]",
                self.traffic_fraction
            )));
        }
        if self.attribution_window_secs <= 0 {
            return Err(DomainError::Configuration(
                "attribution window must be positive".to_string(),
            ));
        }
        self.traffic_plan.validate()?;
        self.guardrail_config.validate()?;
        self.decision_config.validate()?;
        Ok(())
    }

    pub fn attribution_window(&self) -> Duration {
        Duration::seconds(self.attribution_window_secs)
    }

    /// Transition the status, enforcing the state machine.
    pub fn transition(&mut self, to: ExperimentStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        match to {
            ExperimentStatus::Active if self.start_at.is_none() => {
                self.start_at = Some(self.updated_at);
            }
            ExperimentStatus::Ended | ExperimentStatus::Killed => {
                self.end_at = Some(self.updated_at);
            }
            _ => {}
        }
        Ok(())
    }

    /// Ramp the traffic fraction. While active it may only grow, so users
    /// already in the experiment stay in it.
    pub fn set_traffic_fraction(&mut self, fraction: f64) -> DomainResult<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(DomainError::Configuration(format!(
                "traffic_fraction {fraction} outside [0, 1]"
            )));
        }
        if self.status == ExperimentStatus::Active && fraction < self.traffic_fraction {
            return Err(DomainError::Configuration(format!(
                "traffic_fraction may only grow while active ({} -> {fraction})",
                self.traffic_fraction
            )));
        }
        self.traffic_fraction = fraction;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_ab() -> TrafficPlan {
        TrafficPlan::new(vec![("a".to_string(), 0.5), ("b".to_string(), 0.5)])
    }

    #[test]
    fn test_status_transitions() {
        assert!(ExperimentStatus::Draft.can_transition_to(ExperimentStatus::Active));
        assert!(!ExperimentStatus::Draft.can_transition_to(ExperimentStatus::Paused));
        assert!(ExperimentStatus::Active.can_transition_to(ExperimentStatus::Killed));
        assert!(ExperimentStatus::Paused.can_transition_to(ExperimentStatus::Active));
        assert!(ExperimentStatus::Ended.valid_transitions().is_empty());
        assert!(ExperimentStatus::Killed.is_terminal());
    }

    #[test]
    fn test_plan_validation() {
        assert!(plan_ab().validate().is_ok());

        let bad = TrafficPlan::new(vec![("a".to_string(), 0.6), ("b".to_string(), 0.5)]);
        assert!(bad.validate().is_err());

        let empty = TrafficPlan::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_plan_cumulative_walk() {
        let plan = TrafficPlan::new(vec![
            ("a".to_string(), 0.3),
            ("b".to_string(), 0.3),
            ("c".to_string(), 0.4),
        ]);
        assert_eq!(plan.policy_for(0.0), Some("a"));
        assert_eq!(plan.policy_for(0.299), Some("a"));
        assert_eq!(plan.policy_for(0.3), Some("b"));
        assert_eq!(plan.policy_for(0.75), Some("c"));
        assert_eq!(plan.policy_for(0.999_999_9), Some("c"));
    }

    #[test]
    fn test_ramp_only_grows_while_active() {
        let mut exp = Experiment::new("e", "home", "s1", 0.1, plan_ab(), "control");
        exp.transition(ExperimentStatus::Active).unwrap();
        assert!(exp.set_traffic_fraction(0.2).is_ok());
        assert!(exp.set_traffic_fraction(0.1).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_salt() {
        let mut exp = Experiment::new("e", "home", "", 0.1, plan_ab(), "control");
        assert!(exp.validate().is_err());
        exp.salt = "s1".to_string();
        assert!(exp.validate().is_ok());
    }

    #[test]
    fn test_transition_stamps_lifecycle_times() {
        let mut exp = Experiment::new("e", "home", "s1", 0.1, plan_ab(), "control");
        assert!(exp.start_at.is_none());
        exp.transition(ExperimentStatus::Active).unwrap();
        assert!(exp.start_at.is_some());
        exp.transition(ExperimentStatus::Killed).unwrap();
        assert!(exp.end_at.is_some());
        assert!(exp.transition(ExperimentStatus::Active).is_err());
    }
}
