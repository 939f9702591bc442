//! Beta-Bernoulli Thompson sampling.

use rand::rngs::SmallRng;
use rand_distr::{Beta, Distribution};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::PolicyKind;
use crate::domain::policy::{require_candidates, BanditPolicy, Selection, StateView};

/// Thompson sampling over Beta posteriors.
///
/// Selection draws one sample per arm and takes the argmax. Propensities
/// have no closed form, so they are estimated by Monte-Carlo over `mc_draws`
/// rounds and floored so every candidate keeps mass in (0, 1].
pub struct ThompsonPolicy {
    alpha0: f64,
    beta0: f64,
    mc_draws: u32,
}

impl ThompsonPolicy {
    pub fn new(alpha0: f64, beta0: f64, mc_draws: u32) -> Self {
        Self { alpha0, beta0, mc_draws }
    }

    /// Beta distributions for the candidate set, validating state.
    fn posteriors(
        &self,
        candidates: &[String],
        state: &StateView,
    ) -> DomainResult<Vec<Beta<f64>>> {
        candidates
            .iter()
            .map(|arm_id| {
                let (alpha, beta) = match state.get(arm_id) {
                    Some(s) => (s.alpha, s.beta),
                    None => (self.alpha0, self.beta0),
                };
                if alpha <= 0.0 || beta <= 0.0 {
                    return Err(DomainError::InvalidState(format!(
                        "non-positive posterior for arm {arm_id} (alpha={alpha}, beta={beta})"
                    )));
                }
                Beta::new(alpha, beta).map_err(|e| {
                    DomainError::InvalidState(format!("beta({alpha}, {beta}) for {arm_id}: {e}"))
                })
            })
            .collect()
    }

    /// One sampling round: index of the argmax draw and its value.
    fn draw_round(posteriors: &[Beta<f64>], rng: &mut SmallRng) -> (usize, f64) {
        let mut best = 0;
        let mut best_theta = f64::NEG_INFINITY;
        for (i, dist) in posteriors.iter().enumerate() {
            let theta: f64 = dist.sample(rng);
            if theta > best_theta {
                best_theta = theta;
                best = i;
            }
        }
        (best, best_theta)
    }

    /// Monte-Carlo win frequencies with the smoothing floor applied.
    fn mc_propensities(&self, posteriors: &[Beta<f64>], rng: &mut SmallRng) -> Vec<f64> {
        let k = posteriors.len();
        let n = self.mc_draws as usize;
        let mut wins = vec![0u32; k];
        for _ in 0..n {
            let (winner, _) = Self::draw_round(posteriors, rng);
            wins[winner] += 1;
        }
        // Floor keeps every propensity strictly positive for IPS weighting.
        let floor = 1.0 / (n as f64 + k as f64 * n as f64);
        let mut probs: Vec<f64> =
            wins.iter().map(|w| (f64::from(*w) / n as f64).max(floor)).collect();
        let total: f64 = probs.iter().sum();
        for p in &mut probs {
            *p /= total;
        }
        probs
    }
}

impl BanditPolicy for ThompsonPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Thompson
    }

    fn select(
        &self,
        candidates: &[String],
        state: &StateView,
        rng: &mut SmallRng,
    ) -> DomainResult<Selection> {
        require_candidates(candidates)?;
        let posteriors = self.posteriors(candidates, state)?;

        let (chosen, theta) = Self::draw_round(&posteriors, rng);
        let probs = self.mc_propensities(&posteriors, rng);

        Ok(Selection {
            arm_id: candidates[chosen].clone(),
            propensity: probs[chosen],
            score: theta,
        })
    }

    fn propensities(
        &self,
        candidates: &[String],
        state: &StateView,
        rng: &mut SmallRng,
    ) -> DomainResult<Vec<f64>> {
        require_candidates(candidates)?;
        let posteriors = self.posteriors(candidates, state)?;
        Ok(self.mc_propensities(&posteriors, rng))
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

    fn seeded_view(ids: &[&str]) -> StateView {
        let mut view = StateView::default();
        view.seed_missing(Uuid::new_v4(), "p", "", &candidates(ids), 1.0, 1.0);
        view
    }

    #[test]
    fn test_uniform_prior_selects_roughly_uniformly() {
        let policy = ThompsonPolicy::new(1.0, 1.0, 500);
        let view = seeded_view(&["a", "b", "c", "d"]);
        let cands = candidates(&["a", "b", "c", "d"]);

        let mut rng = SmallRng::seed_from_u64(42);
        let mut counts = [0u32; 4];
        let trials = 4000;
        for _ in 0..trials {
            let (i, _) = ThompsonPolicy::draw_round(
                &policy.posteriors(&cands, &view).unwrap(),
                &mut rng,
            );
            counts[i] += 1;
        }
        // Chi-squared against uniform with 3 dof; critical value at p=0.01.
        let expected = f64::from(trials) / 4.0;
        let chi2: f64 = counts
            .iter()
            .map(|c| {
                let d = f64::from(*c) - expected;
                d * d / expected
            })
            .sum();
        assert!(chi2 < 11.34, "chi2 = {chi2}");
    }

    #[test]
    fn test_sharp_posterior_concentrates() {
        let exp = Uuid::new_v4();
        let mut view = StateView::default();
        let mut hot = ArmState::seeded(StateKey::new(exp, "p", "hot", ""), 1.0, 1.0);
        hot.alpha = 90.0;
        hot.beta = 10.0;
        view.insert(hot);
        let mut cold = ArmState::seeded(StateKey::new(exp, "p", "cold", ""), 1.0, 1.0);
        cold.alpha = 10.0;
        cold.beta = 90.0;
        view.insert(cold);

        let policy = ThompsonPolicy::new(1.0, 1.0, 1000);
        let cands = candidates(&["hot", "cold"]);
        let mut rng = SmallRng::seed_from_u64(7);
        let probs = policy.propensities(&cands, &view, &mut rng).unwrap();
        assert!(probs[0] > 0.95, "hot arm propensity {}", probs[0]);
        assert!(probs[1] > 0.0);
    }

    #[test]
    fn test_propensity_floor_strictly_positive() {
        let exp = Uuid::new_v4();
        let mut view = StateView::default();
        let mut hot = ArmState::seeded(StateKey::new(exp, "p", "hot", ""), 1.0, 1.0);
        hot.alpha = 500.0;
        hot.beta = 1.0;
        view.insert(hot);
        let mut cold = ArmState::seeded(StateKey::new(exp, "p", "cold", ""), 1.0, 1.0);
        cold.alpha = 1.0;
        cold.beta = 500.0;
        view.insert(cold);

        let policy = ThompsonPolicy::new(1.0, 1.0, 500);
        let mut rng = SmallRng::seed_from_u64(3);
        let probs = policy
            .propensities(&candidates(&["hot", "cold"]), &view, &mut rng)
            .unwrap();
        assert!(probs[1] > 0.0);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_corrupt_state_fails_loudly() {
        let exp = Uuid::new_v4();
        let mut view = StateView::default();
        let mut bad = ArmState::seeded(StateKey::new(exp, "p", "a", ""), 1.0, 1.0);
        bad.alpha = 0.0;
        view.insert(bad);

        let policy = ThompsonPolicy::new(1.0, 1.0, 500);
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(
            policy.select(&candidates(&["a"]), &view, &mut rng),
            Err(DomainError::InvalidState(_))
        ));
    }
}
