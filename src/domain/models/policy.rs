//! Policy configuration model.
//!
//! Policies are a tagged sum over exploration strategies with kind-specific
//! parameter records. The runtime behavior lives in `domain::policy`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Exploration strategy kind. Storage carries the tagged [`PolicyParams`]
/// record; the kind itself is an in-memory discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Thompson,
    EGreedy,
    Ucb,
    Control,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thompson => "thompson",
            Self::EGreedy => "egreedy",
            Self::Ucb => "ucb",
            Self::Control => "control",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "thompson" => Some(Self::Thompson),
            "egreedy" => Some(Self::EGreedy),
            "ucb" => Some(Self::Ucb),
            "control" => Some(Self::Control),
            _ => None,
        }
    }
}

/// Kind-specific policy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyParams {
    /// Beta-Bernoulli Thompson sampling.
    Thompson {
        /// Prior alpha, must be > 0.
        #[serde(default = "default_prior")]
        alpha0: f64,
        /// Prior beta, must be > 0.
        #[serde(default = "default_prior")]
        beta0: f64,
        /// Monte-Carlo draws for propensity estimation.
        #[serde(default = "default_mc_draws")]
        mc_draws: u32,
        /// Partition sufficient statistics by context key.
        #[serde(default)]
        contextual: bool,
    },
    /// Epsilon-greedy over mean rewards.
    Egreedy {
        epsilon: f64,
    },
    /// UCB1 with exploration constant `c`.
    Ucb {
        #[serde(default = "default_ucb_c")]
        c: f64,
        /// Optional floor applied to recorded propensities so off-policy
        /// estimators never see an exact point mass.
        #[serde(default)]
        exploration_floor: f64,
    },
    /// Deterministic fixed policy, typically the legacy ranker.
    Control {
        /// Arm to serve; when absent the first eligible arm wins.
        #[serde(default)]
        arm_id: Option<String>,
    },
}

fn default_prior() -> f64 {
    1.0
}

fn default_mc_draws() -> u32 {
    1000
}

fn default_ucb_c() -> f64 {
    1.0
}

/// Minimum Monte-Carlo draws accepted for Thompson propensities.
pub const MIN_MC_DRAWS: u32 = 500;

impl PolicyParams {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Thompson { .. } => PolicyKind::Thompson,
            Self::Egreedy { .. } => PolicyKind::EGreedy,
            Self::Ucb { .. } => PolicyKind::Ucb,
            Self::Control { .. } => PolicyKind::Control,
        }
    }

    /// Whether per-context state rows are kept for this policy.
    pub fn is_contextual(&self) -> bool {
        matches!(self, Self::Thompson { contextual: true, .. })
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Self::Thompson { alpha0, beta0, mc_draws, .. } => {
                if *alpha0 <= 0.0 || *beta0 <= 0.0 {
                    return Err(DomainError::InvalidState(format!(
                        "thompson priors must be positive (alpha0={alpha0}, beta0={beta0})"
                    )));
                }
                if *mc_draws < MIN_MC_DRAWS {
                    return Err(DomainError::Configuration(format!(
                        "mc_draws {mc_draws} below minimum {MIN_MC_DRAWS}"
                    )));
                }
            }
            Self::Egreedy { epsilon } => {
                if !(0.0..=1.0).contains(epsilon) {
                    return Err(DomainError::Configuration(format!(
                        "epsilon {epsilon} outside [0, 1]"
                    )));
                }
            }
            Self::Ucb { c, exploration_floor } => {
                if *c < 0.0 {
                    return Err(DomainError::Configuration(format!(
                        "ucb exploration constant {c} must be non-negative"
                    )));
                }
                if !(0.0..1.0).contains(exploration_floor) {
                    return Err(DomainError::Configuration(format!(
                        "exploration_floor {exploration_floor} outside [0, 1)"
                    )));
                }
            }
            Self::Control { .. } => {}
        }
        Ok(())
    }
}

/// A policy attached to an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Human-readable id, unique within the experiment (e.g. "treatment-ts").
    pub id: String,
    pub experiment_id: Uuid,
    pub params: PolicyParams,
}

impl PolicyConfig {
    pub fn new(id: impl Into<String>, experiment_id: Uuid, params: PolicyParams) -> Self {
        Self { id: id.into(), experiment_id, params }
    }

    pub fn kind(&self) -> PolicyKind {
        self.params.kind()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.id.is_empty() {
            return Err(DomainError::Configuration("policy id must not be empty".to_string()));
        }
        self.params.validate()
    }
}
