//! Epsilon-greedy over incremental mean rewards.

use rand::rngs::SmallRng;
use rand::Rng;

use crate::domain::errors::DomainResult;
use crate::domain::models::PolicyKind;
use crate::domain::policy::{require_candidates, BanditPolicy, Selection, StateView};

/// With probability `1 - epsilon` exploit the best observed mean, otherwise
/// sample uniformly over the candidates. Propensities are exact:
/// `(1 - eps) * [best] + eps / k`.
pub struct EpsilonGreedyPolicy {
    epsilon: f64,
}

impl EpsilonGreedyPolicy {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Index of the greedy arm: argmax mean reward, ties broken by the
    /// lowest arm id so the choice is deterministic.
    fn greedy_index(candidates: &[String], state: &StateView) -> usize {
        let mut best = 0;
        let mut best_mean = f64::NEG_INFINITY;
        for (i, arm_id) in candidates.iter().enumerate() {
            let mean = state.get(arm_id).map_or(0.0, |s| s.mean_reward());
            let better = mean > best_mean
                || ((mean - best_mean).abs() < f64::EPSILON && arm_id < &candidates[best]);
            if better {
                best_mean = mean;
                best = i;
            }
        }
        best
    }
}

impl BanditPolicy for EpsilonGreedyPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::EGreedy
    }

    fn select(
        &self,
        candidates: &[String],
        state: &StateView,
        rng: &mut SmallRng,
    ) -> DomainResult<Selection> {
        require_candidates(candidates)?;
        let k = candidates.len() as f64;
        let best = Self::greedy_index(candidates, state);

        let explore: f64 = rng.gen();
        let chosen = if explore < self.epsilon {
            rng.gen_range(0..candidates.len())
        } else {
            best
        };

        let propensity = if chosen == best {
            (1.0 - self.epsilon) + self.epsilon / k
        } else {
            self.epsilon / k
        };
        let score = state
            .get(&candidates[chosen])
            .map_or(0.0, |s| s.mean_reward());

        Ok(Selection { arm_id: candidates[chosen].clone(), propensity, score })
    }

    fn propensities(
        &self,
        candidates: &[String],
        state: &StateView,
        _rng: &mut SmallRng,
    ) -> DomainResult<Vec<f64>> {
        require_candidates(candidates)?;
        let k = candidates.len() as f64;
        let best = Self::greedy_index(candidates, state);
        Ok((0..candidates.len())
            .map(|i| {
                if i == best {
                    (1.0 - self.epsilon) + self.epsilon / k
                } else {
                    self.epsilon / k
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ArmState, StateKey};
    use rand::SeedableRng;
    use uuid::Uuid;

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    fn view_with_means(means: &[(&str, f64, i64)]) -> StateView {
        let exp = Uuid::new_v4();
        let mut view = StateView::default();
        for (arm, mean, pulls) in means {
            let mut s = ArmState::seeded(StateKey::new(exp, "p", *arm, ""), 1.0, 1.0);
            s.pulls = *pulls;
            s.sum_reward = mean * *pulls as f64;
            view.insert(s);
        }
        view
    }

    #[test]
    fn test_epsilon_zero_is_pure_greedy() {
        let policy = EpsilonGreedyPolicy::new(0.0);
        let view = view_with_means(&[("a", 0.2, 10), ("b", 0.8, 10)]);
        let cands = candidates(&["a", "b"]);
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..50 {
            let sel = policy.select(&cands, &view, &mut rng).unwrap();
            assert_eq!(sel.arm_id, "b");
            assert!((sel.propensity - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_epsilon_one_is_uniform() {
        let policy = EpsilonGreedyPolicy::new(1.0);
        let view = view_with_means(&[("a", 0.2, 10), ("b", 0.8, 10)]);
        let cands = candidates(&["a", "b"]);
        let probs = policy
            .propensities(&cands, &view, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert!((probs[0] - 0.5).abs() < 1e-12);
        assert!((probs[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_closed_form_propensities() {
        let policy = EpsilonGreedyPolicy::new(0.1);
        let view = view_with_means(&[("a", 0.9, 10), ("b", 0.1, 10), ("c", 0.1, 10)]);
        let cands = candidates(&["a", "b", "c"]);
        let probs = policy
            .propensities(&cands, &view, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert!((probs[0] - (0.9 + 0.1 / 3.0)).abs() < 1e-12);
        assert!((probs[1] - 0.1 / 3.0).abs() < 1e-12);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_by_lowest_arm_id() {
        let policy = EpsilonGreedyPolicy::new(0.0);
        let view = view_with_means(&[("b", 0.5, 10), ("a", 0.5, 10)]);
        let cands = candidates(&["b", "a"]);
        let sel = policy
            .select(&cands, &view, &mut SmallRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(sel.arm_id, "a");
    }
}
