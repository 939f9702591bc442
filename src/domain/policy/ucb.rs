//! UCB1 upper-confidence-bound policy.

use rand::rngs::SmallRng;

use crate::domain::errors::DomainResult;
use crate::domain::models::PolicyKind;
use crate::domain::policy::{require_candidates, BanditPolicy, Selection, StateView};

/// Deterministic UCB1: unpulled arms first (lowest arm id), then
/// `argmax mean + c * sqrt(2 ln N / n)`.
///
/// The policy is deterministic at a given state, so the true propensity is a
/// point mass on the chosen arm. `exploration_floor` optionally lifts the
/// recorded propensities off zero for estimators that reject point masses.
pub struct Ucb1Policy {
    c: f64,
    exploration_floor: f64,
}

impl Ucb1Policy {
    pub fn new(c: f64, exploration_floor: f64) -> Self {
        Self { c, exploration_floor }
    }

    /// Index the policy deterministically picks at this state.
    fn choose(&self, candidates: &[String], state: &StateView) -> usize {
        // Cold start: visit unpulled arms round-robin by arm id.
        let mut unpulled: Option<usize> = None;
        for (i, arm_id) in candidates.iter().enumerate() {
            let pulls = state.get(arm_id).map_or(0, |s| s.pulls);
            if pulls == 0 {
                let replace = match unpulled {
                    Some(j) => arm_id < &candidates[j],
                    None => true,
                };
                if replace {
                    unpulled = Some(i);
                }
            }
        }
        if let Some(i) = unpulled {
            return i;
        }

        let total: i64 = candidates
            .iter()
            .map(|arm_id| state.get(arm_id).map_or(0, |s| s.pulls))
            .sum();
        let ln_total = (total.max(1) as f64).ln();

        let mut best = 0;
        let mut best_bound = f64::NEG_INFINITY;
        for (i, arm_id) in candidates.iter().enumerate() {
            let s = state.get(arm_id);
            let pulls = s.map_or(0, |s| s.pulls).max(1);
            let mean = s.map_or(0.0, |s| s.mean_reward());
            let bound = mean + self.c * (2.0 * ln_total / pulls as f64).sqrt();
            let better = bound > best_bound
                || ((bound - best_bound).abs() < f64::EPSILON && arm_id < &candidates[best]);
            if better {
                best_bound = bound;
                best = i;
            }
        }
        best
    }

    /// Point mass on `chosen`, floored and renormalized when a floor is set.
    fn floored(&self, k: usize, chosen: usize) -> Vec<f64> {
        let mut probs: Vec<f64> = (0..k)
            .map(|i| {
                let raw: f64 = if i == chosen { 1.0 } else { 0.0 };
                raw.max(self.exploration_floor)
            })
            .collect();
        let total: f64 = probs.iter().sum();
        for p in &mut probs {
            *p /= total;
        }
        probs
    }
}

impl BanditPolicy for Ucb1Policy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Ucb
    }

    fn select(
        &self,
        candidates: &[String],
        state: &StateView,
        _rng: &mut SmallRng,
    ) -> DomainResult<Selection> {
        require_candidates(candidates)?;
        let chosen = self.choose(candidates, state);
        let probs = self.floored(candidates.len(), chosen);
        let score = state
            .get(&candidates[chosen])
            .map_or(0.0, |s| s.mean_reward());

        Ok(Selection {
            arm_id: candidates[chosen].clone(),
            propensity: probs[chosen],
            score,
        })
    }

    fn propensities(
        &self,
        candidates: &[String],
        state: &StateView,
        _rng: &mut SmallRng,
    ) -> DomainResult<Vec<f64>> {
        require_candidates(candidates)?;
        let chosen = self.choose(candidates, state);
        Ok(self.floored(candidates.len(), chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ArmState, PolicyKind, StateKey};
    use rand::SeedableRng;
    use uuid::Uuid;

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_cold_start_visits_every_arm_once() {
        let exp = Uuid::new_v4();
        let policy = Ucb1Policy::new(1.0, 0.0);
        let cands = candidates(&["c", "a", "b"]);
        let mut view = StateView::default();
        view.seed_missing(exp, "p", "", &cands, 1.0, 1.0);

        let mut rng = SmallRng::seed_from_u64(1);
        let mut visited = Vec::new();
        for _ in 0..3 {
            let sel = policy.select(&cands, &view, &mut rng).unwrap();
            assert!((sel.propensity - 1.0).abs() < 1e-12);
            visited.push(sel.arm_id.clone());
            let s = view.get_mut(&sel.arm_id).unwrap();
            s.apply_reward(PolicyKind::Ucb, 0.0).unwrap();
        }
        visited.sort();
        assert_eq!(visited, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_exploits_highest_bound_after_cold_start() {
        let exp = Uuid::new_v4();
        let mut view = StateView::default();
        for (arm, mean, pulls) in [("a", 0.9, 100i64), ("b", 0.1, 100)] {
            let mut s = ArmState::seeded(StateKey::new(exp, "p", arm, ""), 1.0, 1.0);
            s.pulls = pulls;
            s.sum_reward = mean * pulls as f64;
            view.insert(s);
        }
        let policy = Ucb1Policy::new(1.0, 0.0);
        let sel = policy
            .select(&candidates(&["a", "b"]), &view, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(sel.arm_id, "a");
    }

    #[test]
    fn test_undersampled_arm_wins_on_bonus() {
        let exp = Uuid::new_v4();
        let mut view = StateView::default();
        for (arm, mean, pulls) in [("a", 0.6, 10_000i64), ("b", 0.5, 2)] {
            let mut s = ArmState::seeded(StateKey::new(exp, "p", arm, ""), 1.0, 1.0);
            s.pulls = pulls;
            s.sum_reward = mean * pulls as f64;
            view.insert(s);
        }
        let policy = Ucb1Policy::new(1.0, 0.0);
        let sel = policy
            .select(&candidates(&["a", "b"]), &view, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(sel.arm_id, "b");
    }

    #[test]
    fn test_exploration_floor_renormalizes() {
        let exp = Uuid::new_v4();
        let policy = Ucb1Policy::new(1.0, 0.05);
        let cands = candidates(&["a", "b", "c"]);
        let mut view = StateView::default();
        view.seed_missing(exp, "p", "", &cands, 1.0, 1.0);

        let probs = policy
            .propensities(&cands, &view, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(probs.iter().all(|p| *p >= 0.05 / 1.1));
    }
}
