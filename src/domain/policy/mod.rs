//! Policy engine: exploration strategies behind a uniform interface.
//!
//! Every policy implements [`BanditPolicy`]: select an arm from a candidate
//! set and report the propensity with which it would have been chosen at
//! this exact state, apply attributed rewards to sufficient statistics, and
//! snapshot/restore state. Online serving and offline replay share this
//! code path.

mod control;
mod egreedy;
mod snapshot;
mod thompson;
mod ucb;

pub use control::ControlPolicy;
pub use egreedy::EpsilonGreedyPolicy;
pub use snapshot::PolicySnapshot;
pub use thompson::ThompsonPolicy;
pub use ucb::Ucb1Policy;

use rand::rngs::SmallRng;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ArmState, PolicyKind, PolicyParams, StateKey};

/// Result of a policy selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub arm_id: String,
    /// Probability over the candidate set that this policy returns `arm_id`
    /// at the state it was given. Always in (0, 1].
    pub propensity: f64,
    /// Policy-specific score of the chosen arm (sampled value, mean, or
    /// upper confidence bound).
    pub score: f64,
}

/// In-memory view of one (policy, context) slice of sufficient statistics,
/// keyed by arm id.
#[derive(Debug, Clone, Default)]
pub struct StateView {
    arms: HashMap<String, ArmState>,
}

impl StateView {
    pub fn new(states: impl IntoIterator<Item = ArmState>) -> Self {
        Self {
            arms: states.into_iter().map(|s| (s.key.arm_id.clone(), s)).collect(),
        }
    }

    pub fn get(&self, arm_id: &str) -> Option<&ArmState> {
        self.arms.get(arm_id)
    }

    pub fn get_mut(&mut self, arm_id: &str) -> Option<&mut ArmState> {
        self.arms.get_mut(arm_id)
    }

    pub fn insert(&mut self, state: ArmState) {
        self.arms.insert(state.key.arm_id.clone(), state);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArmState> {
        self.arms.values()
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Seed prior rows for any candidate missing from the view, so every
    /// policy sees a complete state over its candidate set.
    pub fn seed_missing(
        &mut self,
        experiment_id: Uuid,
        policy_id: &str,
        context_key: &str,
        candidates: &[String],
        alpha0: f64,
        beta0: f64,
    ) {
        for arm_id in candidates {
            if !self.arms.contains_key(arm_id) {
                let key = StateKey::new(experiment_id, policy_id, arm_id.clone(), context_key);
                self.insert(ArmState::seeded(key, alpha0, beta0));
            }
        }
    }
}

/// Uniform interface over exploration strategies.
///
/// `select` and `propensities` are read-only over the state view; `update`
/// is a pure fold of one attributed reward into one arm's statistics.
pub trait BanditPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Choose an arm from `candidates`. Propensities over the candidate set
    /// sum to one; the returned propensity is the chosen arm's component.
    fn select(
        &self,
        candidates: &[String],
        state: &StateView,
        rng: &mut SmallRng,
    ) -> DomainResult<Selection>;

    /// Full propensity vector over `candidates` at this state, aligned with
    /// the input order. Used by off-policy estimators and replay.
    fn propensities(
        &self,
        candidates: &[String],
        state: &StateView,
        rng: &mut SmallRng,
    ) -> DomainResult<Vec<f64>>;

    /// Fold one attributed reward into the arm's sufficient statistics.
    fn update(&self, state: &mut ArmState, reward: f64) -> DomainResult<()> {
        state.apply_reward(self.kind(), reward)
    }
}

/// Build the runtime policy for a parameter record.
pub fn build_policy(params: &PolicyParams) -> DomainResult<Box<dyn BanditPolicy>> {
    params.validate()?;
    Ok(match params {
        PolicyParams::Thompson { alpha0, beta0, mc_draws, .. } => {
            Box::new(ThompsonPolicy::new(*alpha0, *beta0, *mc_draws))
        }
        PolicyParams::Egreedy { epsilon } => Box::new(EpsilonGreedyPolicy::new(*epsilon)),
        PolicyParams::Ucb { c, exploration_floor } => {
            Box::new(Ucb1Policy::new(*c, *exploration_floor))
        }
        PolicyParams::Control { arm_id } => Box::new(ControlPolicy::new(arm_id.clone())),
    })
}

pub(crate) fn require_candidates(candidates: &[String]) -> DomainResult<()> {
    if candidates.is_empty() {
        Err(DomainError::NoEligibleArm)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn view(experiment_id: Uuid, arms: &[&str]) -> StateView {
        let mut view = StateView::default();
        view.seed_missing(
            experiment_id,
            "p",
            "",
            &arms.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
            1.0,
            1.0,
        );
        view
    }

    #[test]
    fn test_propensities_sum_to_one_for_every_kind() {
        let experiment_id = Uuid::new_v4();
        let candidates: Vec<String> =
            ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
        let state = view(experiment_id, &["a", "b", "c"]);

        let policies: Vec<Box<dyn BanditPolicy>> = vec![
            Box::new(ThompsonPolicy::new(1.0, 1.0, 1000)),
            Box::new(EpsilonGreedyPolicy::new(0.1)),
            Box::new(Ucb1Policy::new(1.0, 0.0)),
            Box::new(ControlPolicy::new(None)),
        ];
        for policy in policies {
            let mut rng = SmallRng::seed_from_u64(7);
            let probs = policy.propensities(&candidates, &state, &mut rng).unwrap();
            let sum: f64 = probs.iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-6,
                "{:?} propensities sum to {sum}",
                policy.kind()
            );
            assert!(probs.iter().all(|p| *p >= 0.0 && *p <= 1.0));
        }
    }

    #[test]
    fn test_empty_candidates_fail() {
        let state = StateView::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let policy = EpsilonGreedyPolicy::new(0.1);
        assert!(matches!(
            policy.select(&[], &state, &mut rng),
            Err(DomainError::NoEligibleArm)
        ));
    }

    #[test]
    fn test_build_policy_dispatch() {
        let params = PolicyParams::Ucb { c: 1.0, exploration_floor: 0.0 };
        assert_eq!(build_policy(&params).unwrap().kind(), PolicyKind::Ucb);
    }
}
