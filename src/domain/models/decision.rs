//! Decision model: periodic ship / iterate / kill verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Verdict of a decision evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Promote the winner.
    Ship,
    /// Window exhausted without a clear winner; redesign and relaunch.
    Iterate,
    /// Treatment is credibly worse; end the experiment.
    Kill,
    /// Not enough evidence yet; keep collecting.
    Continue,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ship => "ship",
            Self::Iterate => "iterate",
            Self::Kill => "kill",
            Self::Continue => "continue",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ship" => Some(Self::Ship),
            "iterate" => Some(Self::Iterate),
            "kill" => Some(Self::Kill),
            "continue" => Some(Self::Continue),
            _ => None,
        }
    }
}

/// Criteria the decision engine evaluates against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Minimum relative uplift over control for `ship`.
    pub min_uplift: f64,
    /// One-sided confidence required for ship/kill.
    pub confidence: f64,
    /// Minimum observation window before shipping.
    pub min_window_days: i64,
    /// Window after which an inconclusive experiment becomes `iterate`.
    pub max_window_days: i64,
    /// Minimum attributed events per policy.
    pub min_events_per_policy: u64,
    /// Propensity clip floor for IPS weights.
    pub propensity_floor: f64,
    /// Bootstrap resamples for confidence intervals.
    pub bootstrap_rounds: u32,
    /// Apply ship/kill verdicts automatically instead of advising.
    pub auto_apply: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_uplift: 0.03,
            confidence: 0.95,
            min_window_days: 7,
            max_window_days: 14,
            min_events_per_policy: 1000,
            propensity_floor: 0.01,
            bootstrap_rounds: 1000,
            auto_apply: false,
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if !(0.0..1.0).contains(&self.confidence) {
            return Err(DomainError::Configuration(format!(
                "confidence {} outside [0, 1)",
                self.confidence
            )));
        }
        if self.propensity_floor <= 0.0 || self.propensity_floor >= 1.0 {
            return Err(DomainError::Configuration(format!(
                "propensity_floor {} outside (0, 1)",
                self.propensity_floor
            )));
        }
        if self.min_window_days > self.max_window_days {
            return Err(DomainError::Configuration(format!(
                "min_window_days {} exceeds max_window_days {}",
                self.min_window_days, self.max_window_days
            )));
        }
        if self.bootstrap_rounds == 0 {
            return Err(DomainError::Configuration(
                "bootstrap_rounds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Off-policy value estimates for one policy, relative to control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEstimate {
    pub policy_id: String,
    /// Clipped inverse-propensity estimate.
    pub ips: f64,
    /// Doubly-robust estimate.
    pub dr: f64,
    /// Bootstrap CI over the DR estimate.
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub mean_reward: f64,
    pub events: u64,
    /// Welch t-test p-value against control rewards (one-sided).
    pub p_value: f64,
}

/// A recorded decision for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub experiment_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub winner_policy_id: Option<String>,
    /// Relative uplift of the winner (or best policy) over control.
    pub uplift: f64,
    /// Confidence attached to the verdict.
    pub confidence: f64,
    pub estimates: Vec<PolicyEstimate>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_valid() {
        assert!(DecisionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_floor() {
        let config = DecisionConfig { propensity_floor: 0.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_inverted_windows() {
        let config = DecisionConfig { min_window_days: 20, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
