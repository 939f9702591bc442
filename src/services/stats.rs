//! Off-policy estimators and significance tests.
//!
//! Shared by the decision engine, the guardrail monitor, and offline
//! replay so online and offline evaluation agree by construction.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

/// One logged observation prepared for off-policy evaluation.
#[derive(Debug, Clone, Copy)]
pub struct OpeSample {
    /// Observed reward of the logged serve.
    pub reward: f64,
    /// Propensity the logging policy recorded.
    pub logged_propensity: f64,
    /// Probability the target policy assigns to the logged arm.
    pub target_propensity: f64,
    /// Direct reward-model estimate for the logged (arm, context);
    /// per-arm mean reward when no learned model is supplied.
    pub q_hat: f64,
}

impl OpeSample {
    fn weight(&self, propensity_floor: f64) -> f64 {
        self.target_propensity / self.logged_propensity.max(propensity_floor)
    }
}

/// Clipped inverse-propensity estimate of the target policy's value.
pub fn ips_estimate(samples: &[OpeSample], propensity_floor: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples
        .iter()
        .map(|s| s.reward * s.weight(propensity_floor))
        .sum();
    total / samples.len() as f64
}

/// Doubly-robust estimate: IPS corrected by the direct model,
/// `V_DR = V_IPS - (1/N) * sum((w - 1) * q_hat)`.
pub fn dr_estimate(samples: &[OpeSample], propensity_floor: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let correction: f64 = samples
        .iter()
        .map(|s| (s.weight(propensity_floor) - 1.0) * s.q_hat)
        .sum::<f64>()
        / samples.len() as f64;
    ips_estimate(samples, propensity_floor) - correction
}

/// Percentile bootstrap confidence interval over an estimator.
/// Deterministic for a fixed seed.
pub fn bootstrap_ci(
    samples: &[OpeSample],
    propensity_floor: f64,
    estimator: fn(&[OpeSample], f64) -> f64,
    rounds: u32,
    confidence: f64,
    seed: u64,
) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut estimates = Vec::with_capacity(rounds as usize);
    let mut resample = Vec::with_capacity(samples.len());
    for _ in 0..rounds {
        resample.clear();
        for _ in 0..samples.len() {
            resample.push(samples[rng.gen_range(0..samples.len())]);
        }
        estimates.push(estimator(&resample, propensity_floor));
    }
    estimates.sort_by(|a, b| a.total_cmp(b));

    let tail = (1.0 - confidence) / 2.0;
    (percentile(&estimates, tail), percentile(&estimates, 1.0 - tail))
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Welch's t-test. Returns `(t, p)` where `p` is the one-sided p-value for
/// the alternative `mean(treatment) > mean(control)`.
pub fn welch_t_test(treatment: &[f64], control: &[f64]) -> Option<(f64, f64)> {
    let (nx, ny) = (treatment.len(), control.len());
    if nx < 2 || ny < 2 {
        return None;
    }
    let (mx, my) = (mean(treatment), mean(control));
    let (vx, vy) = (variance(treatment, mx), variance(control, my));
    let se_sq = vx / nx as f64 + vy / ny as f64;
    if se_sq <= 0.0 {
        return None;
    }
    let t = (mx - my) / se_sq.sqrt();

    // Welch-Satterthwaite degrees of freedom.
    let dof = se_sq * se_sq
        / ((vx / nx as f64).powi(2) / (nx as f64 - 1.0)
            + (vy / ny as f64).powi(2) / (ny as f64 - 1.0));
    let dist = StudentsT::new(0.0, 1.0, dof).ok()?;
    Some((t, 1.0 - dist.cdf(t)))
}

/// Chi-squared goodness-of-fit p-value of observed counts against expected
/// shares. Used for the sample-ratio-mismatch guardrail.
pub fn chi_squared_p(observed: &[u64], expected_shares: &[f64]) -> Option<f64> {
    if observed.len() != expected_shares.len() || observed.len() < 2 {
        return None;
    }
    let total: u64 = observed.iter().sum();
    if total == 0 {
        return None;
    }
    let mut chi2 = 0.0;
    for (o, share) in observed.iter().zip(expected_shares) {
        let e = share * total as f64;
        if e <= 0.0 {
            return None;
        }
        let d = *o as f64 - e;
        chi2 += d * d / e;
    }
    let dist = ChiSquared::new((observed.len() - 1) as f64).ok()?;
    Some(1.0 - dist.cdf(chi2))
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn variance(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(reward: f64, logged: f64, target: f64, q: f64) -> OpeSample {
        OpeSample { reward, logged_propensity: logged, target_propensity: target, q_hat: q }
    }

    #[test]
    fn test_ips_identity_policy_recovers_mean() {
        // Target equals logging policy: IPS reduces to the sample mean.
        let samples: Vec<OpeSample> =
            (0..100).map(|i| sample(f64::from(i % 2), 0.5, 0.5, 0.0)).collect();
        let v = ips_estimate(&samples, 0.01);
        assert!((v - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ips_upweights_underexplored_arm() {
        // Logging policy served the good arm rarely (p=0.1); the target
        // policy always serves it. IPS reweights to its true mean.
        let samples = vec![sample(1.0, 0.1, 1.0, 0.0); 10];
        let v = ips_estimate(&samples, 0.01);
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_propensity_clip_bounds_weights() {
        let samples = vec![sample(1.0, 1e-6, 1.0, 0.0)];
        let v = ips_estimate(&samples, 0.01);
        assert!(v <= 100.0 + 1e-9);
    }

    #[test]
    fn test_dr_equals_ips_with_zero_model() {
        let samples: Vec<OpeSample> =
            (0..50).map(|i| sample(f64::from(i % 2), 0.4, 0.6, 0.0)).collect();
        assert!((dr_estimate(&samples, 0.01) - ips_estimate(&samples, 0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_dr_correction_direction() {
        // Perfect model (q_hat == reward) with weight > 1: DR subtracts the
        // overweighted model term.
        let samples = vec![sample(1.0, 0.5, 1.0, 1.0); 10];
        let ips = ips_estimate(&samples, 0.01);
        let dr = dr_estimate(&samples, 0.01);
        assert!((ips - 2.0).abs() < 1e-9);
        assert!((dr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bootstrap_is_deterministic_and_ordered() {
        let samples: Vec<OpeSample> =
            (0..200).map(|i| sample(f64::from(i % 3 == 0), 0.5, 0.5, 0.0)).collect();
        let a = bootstrap_ci(&samples, 0.01, ips_estimate, 200, 0.95, 42);
        let b = bootstrap_ci(&samples, 0.01, ips_estimate, 200, 0.95, 42);
        assert_eq!(a, b);
        assert!(a.0 <= a.1);
        let point = ips_estimate(&samples, 0.01);
        assert!(a.0 <= point && point <= a.1);
    }

    #[test]
    fn test_welch_detects_clear_separation() {
        let treatment: Vec<f64> = (0..200).map(|i| 0.6 + f64::from(i % 2) * 0.01).collect();
        let control: Vec<f64> = (0..200).map(|i| 0.4 + f64::from(i % 2) * 0.01).collect();
        let (t, p) = welch_t_test(&treatment, &control).unwrap();
        assert!(t > 0.0);
        assert!(p < 0.001);
    }

    #[test]
    fn test_welch_symmetric_under_no_effect() {
        let xs: Vec<f64> = (0..100).map(|i| f64::from(i % 5)).collect();
        let (t, p) = welch_t_test(&xs, &xs).unwrap();
        assert!(t.abs() < 1e-9);
        assert!((p - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_chi_squared_flags_skewed_split() {
        // Planned 50/50, observed 700/300.
        let p = chi_squared_p(&[700, 300], &[0.5, 0.5]).unwrap();
        assert!(p < 0.001);

        let p_ok = chi_squared_p(&[505, 495], &[0.5, 0.5]).unwrap();
        assert!(p_ok > 0.5);
    }
}
