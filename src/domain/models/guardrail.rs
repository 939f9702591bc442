//! Guardrail configuration and check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Named guardrail checks the monitor evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailName {
    ErrorRate,
    LatencyP95,
    ArmConcentration,
    RewardDrop,
    SampleRatio,
}

impl GuardrailName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "error_rate",
            Self::LatencyP95 => "latency_p95",
            Self::ArmConcentration => "arm_concentration",
            Self::RewardDrop => "reward_drop",
            Self::SampleRatio => "sample_ratio",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error_rate" => Some(Self::ErrorRate),
            "latency_p95" => Some(Self::LatencyP95),
            "arm_concentration" => Some(Self::ArmConcentration),
            "reward_drop" => Some(Self::RewardDrop),
            "sample_ratio" => Some(Self::SampleRatio),
            _ => None,
        }
    }

    /// Critical checks bypass the rollback rate limit.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::ErrorRate | Self::LatencyP95)
    }

    pub fn all() -> &'static [GuardrailName] {
        &[
            Self::ErrorRate,
            Self::LatencyP95,
            Self::ArmConcentration,
            Self::RewardDrop,
            Self::SampleRatio,
        ]
    }
}

/// Outcome of one check evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStatus {
    Pass,
    Warn,
    Fail,
}

impl GuardrailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pass" => Some(Self::Pass),
            "warn" => Some(Self::Warn),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Action the monitor took on a check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    None,
    Alert,
    Rollback,
}

impl GuardrailAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Alert => "alert",
            Self::Rollback => "rollback",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "alert" => Some(Self::Alert),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// Per-experiment guardrail thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Sliding window the checks aggregate over.
    pub window_secs: i64,
    /// Serve error rate above which the experiment is rolled back.
    pub max_error_rate: f64,
    /// p95 serve latency ceiling in milliseconds.
    pub max_latency_p95_ms: f64,
    /// Max share of serves a single arm may take before alerting; rollback
    /// when it persists for `concentration_windows` consecutive windows.
    pub max_arm_concentration: f64,
    pub concentration_windows: u32,
    /// Relative treatment-minus-control reward floor (negative).
    pub min_relative_reward: f64,
    /// Chi-squared p-value below which the observed split is suspect.
    pub sample_ratio_p_threshold: f64,
    /// Minimum serves in the window before checks are meaningful.
    pub min_serves: u64,
    /// At most one non-critical rollback per experiment per this interval.
    pub rollback_cooldown_secs: i64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_error_rate: 0.01,
            max_latency_p95_ms: 120.0,
            max_arm_concentration: 0.5,
            concentration_windows: 2,
            min_relative_reward: -0.05,
            sample_ratio_p_threshold: 0.001,
            min_serves: 100,
            rollback_cooldown_secs: 3600,
        }
    }
}

impl GuardrailConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if self.window_secs <= 0 {
            return Err(DomainError::Configuration(
                "guardrail window must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(DomainError::Configuration(format!(
                "max_error_rate {} outside [0, 1]",
                self.max_error_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.max_arm_concentration) {
            return Err(DomainError::Configuration(format!(
                "max_arm_concentration {} outside [0, 1]",
                self.max_arm_concentration
            )));
        }
        if self.min_relative_reward > 0.0 {
            return Err(DomainError::Configuration(
                "min_relative_reward must not be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sample_ratio_p_threshold) {
            return Err(DomainError::Configuration(format!(
                "sample_ratio_p_threshold {} outside [0, 1]",
                self.sample_ratio_p_threshold
            )));
        }
        Ok(())
    }
}

/// One recorded check evaluation; append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailCheck {
    pub experiment_id: Uuid,
    pub at: DateTime<Utc>,
    pub name: GuardrailName,
    pub value: f64,
    pub threshold: f64,
    pub status: GuardrailStatus,
    pub action: GuardrailAction,
}
