//! Deterministic control policy.

use rand::rngs::SmallRng;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::PolicyKind;
use crate::domain::policy::{require_candidates, BanditPolicy, Selection, StateView};

/// Stateless fixed policy: serves the configured arm (or the first eligible
/// candidate when none is pinned), standing in for the legacy ranker.
pub struct ControlPolicy {
    arm_id: Option<String>,
}

impl ControlPolicy {
    pub fn new(arm_id: Option<String>) -> Self {
        Self { arm_id }
    }

    fn choose(&self, candidates: &[String]) -> DomainResult<usize> {
        match &self.arm_id {
            Some(pinned) => candidates
                .iter()
                .position(|c| c == pinned)
                .ok_or(DomainError::NoEligibleArm),
            None => Ok(0),
        }
    }
}

impl BanditPolicy for ControlPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Control
    }

    fn select(
        &self,
        candidates: &[String],
        state: &StateView,
        _rng: &mut SmallRng,
    ) -> DomainResult<Selection> {
        require_candidates(candidates)?;
        let chosen = self.choose(candidates)?;
        let score = state
            .get(&candidates[chosen])
            .map_or(0.0, |s| s.mean_reward());
        Ok(Selection {
            arm_id: candidates[chosen].clone(),
            propensity: 1.0,
            score,
        })
    }

    fn propensities(
        &self,
        candidates: &[String],
        _state: &StateView,
        _rng: &mut SmallRng,
    ) -> DomainResult<Vec<f64>> {
        require_candidates(candidates)?;
        let chosen = self.choose(candidates)?;
        Ok((0..candidates.len()).map(|i| f64::from(u8::from(i == chosen))).collect())
    }
}
