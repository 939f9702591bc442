//! Decision engine: periodic ship / iterate / kill evaluation.
//!
//! Scores every treatment policy against control with clipped IPS and
//! doubly-robust estimates over the attributed events, attaches bootstrap
//! confidence intervals and a Welch t-test, and applies the verdict rules
//! from the experiment's decision criteria.

use chrono::{DateTime, Utc};
use futures::future;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Decision, DecisionRunnerConfig, Experiment, ExperimentStatus, PolicyEstimate, ServeEvent,
    Verdict,
};
use crate::domain::policy::{build_policy, StateView};
use crate::domain::ports::{
    CatalogRepository, DecisionRepository, EventRepository, ExperimentRepository,
    PolicyRepository, StateRepository,
};
use crate::services::experiment_service::ExperimentService;
use crate::services::stats::{bootstrap_ci, dr_estimate, ips_estimate, mean, welch_t_test, OpeSample};

/// The decision engine service.
pub struct DecisionEngine {
    experiments: Arc<dyn ExperimentRepository>,
    policies: Arc<dyn PolicyRepository>,
    catalogs: Arc<dyn CatalogRepository>,
    state: Arc<dyn StateRepository>,
    events: Arc<dyn EventRepository>,
    decisions: Arc<dyn DecisionRepository>,
    lifecycle: Arc<ExperimentService>,
    config: DecisionRunnerConfig,
}

impl DecisionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        policies: Arc<dyn PolicyRepository>,
        catalogs: Arc<dyn CatalogRepository>,
        state: Arc<dyn StateRepository>,
        events: Arc<dyn EventRepository>,
        decisions: Arc<dyn DecisionRepository>,
        lifecycle: Arc<ExperimentService>,
        config: DecisionRunnerConfig,
    ) -> Self {
        Self { experiments, policies, catalogs, state, events, decisions, lifecycle, config }
    }

    /// Evaluate every active experiment concurrently.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> DomainResult<()> {
        let experiments = self.experiments.list(Some(ExperimentStatus::Active)).await?;
        let results =
            future::join_all(experiments.iter().map(|e| self.evaluate(e, now))).await;
        for (experiment, result) in experiments.iter().zip(results) {
            match result {
                Ok(decision) => {
                    tracing::info!(
                        experiment_id = %experiment.id,
                        verdict = decision.verdict.as_str(),
                        uplift = decision.uplift,
                        "decision recorded"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        experiment_id = %experiment.id,
                        error = %e,
                        "decision evaluation failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Evaluate one experiment, record the decision, and apply it when the
    /// experiment is configured for auto-apply.
    pub async fn evaluate(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
    ) -> DomainResult<Decision> {
        let criteria = &experiment.decision_config;
        let window_start = self
            .events
            .first_serve_at(experiment.id)
            .await?
            .or(experiment.start_at)
            .unwrap_or(experiment.created_at);
        let window_days = (now - window_start).num_days();

        let attributed = self.events.attributed_events(experiment.id, window_start, now).await?;
        let control_rewards: Vec<f64> = attributed
            .iter()
            .filter(|e| e.policy_id == experiment.default_policy_id)
            .filter_map(|e| e.reward)
            .collect();
        let control_value = mean(&control_rewards);

        // Direct reward model: per-arm mean over all attributed serves.
        let q_hat = per_arm_means(&attributed);

        let catalog = self
            .catalogs
            .get(experiment.id, experiment.catalog_version)
            .await?
            .ok_or(DomainError::UnavailableArmCatalog(experiment.id))?;
        let candidates = catalog.arm_ids();

        let mut estimates = Vec::new();
        for policy in self.policies.list_for_experiment(experiment.id).await? {
            if policy.id == experiment.default_policy_id {
                continue;
            }
            let target = self
                .target_propensities(experiment, &policy.id, &candidates)
                .await?;
            let samples: Vec<OpeSample> = attributed
                .iter()
                .filter_map(|e| {
                    let idx = candidates.iter().position(|a| *a == e.arm_id)?;
                    Some(OpeSample {
                        reward: e.reward?,
                        logged_propensity: e.propensity,
                        target_propensity: target[idx],
                        q_hat: q_hat.get(&e.arm_id).copied().unwrap_or(0.0),
                    })
                })
                .collect();

            let policy_rewards: Vec<f64> = attributed
                .iter()
                .filter(|e| e.policy_id == policy.id)
                .filter_map(|e| e.reward)
                .collect();

            let ips = ips_estimate(&samples, criteria.propensity_floor);
            let dr = dr_estimate(&samples, criteria.propensity_floor);
            let (ci_lower, ci_upper) = bootstrap_ci(
                &samples,
                criteria.propensity_floor,
                dr_estimate,
                criteria.bootstrap_rounds,
                criteria.confidence,
                seed_for(experiment.id, &policy.id),
            );
            let p_value = welch_t_test(&policy_rewards, &control_rewards)
                .map_or(1.0, |(_, p)| p);

            estimates.push(PolicyEstimate {
                policy_id: policy.id,
                ips,
                dr,
                ci_lower,
                ci_upper,
                mean_reward: mean(&policy_rewards),
                events: policy_rewards.len() as u64,
                p_value,
            });
        }

        let decision = self.verdict(
            experiment,
            now,
            window_days,
            control_value,
            control_rewards.len() as u64,
            estimates,
        );
        self.decisions.record(&decision).await?;

        if criteria.auto_apply {
            match decision.verdict {
                Verdict::Kill => {
                    self.lifecycle
                        .kill(experiment.id, "auto-applied kill decision")
                        .await?;
                }
                Verdict::Ship => {
                    // Shipping promotes the winner outside this system; the
                    // experiment itself just ends.
                    self.lifecycle.end(experiment.id).await?;
                }
                Verdict::Iterate | Verdict::Continue => {}
            }
        }
        Ok(decision)
    }

    /// Verdict rules over the computed estimates.
    fn verdict(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
        window_days: i64,
        control_value: f64,
        control_events: u64,
        estimates: Vec<PolicyEstimate>,
    ) -> Decision {
        let criteria = &experiment.decision_config;
        let relative = |value: f64| {
            if control_value.abs() < f64::EPSILON {
                0.0
            } else {
                (value - control_value) / control_value.abs()
            }
        };

        let best = estimates
            .iter()
            .max_by(|a, b| a.dr.total_cmp(&b.dr))
            .cloned();

        let (verdict, winner, uplift, confidence) = match &best {
            None => (Verdict::Continue, None, 0.0, 0.0),
            Some(best) => {
                let uplift = relative(best.dr);
                let uplift_upper = relative(best.ci_upper);
                let confidence = 1.0 - best.p_value;
                let enough_data = best.events >= criteria.min_events_per_policy
                    && control_events >= criteria.min_events_per_policy;

                if enough_data
                    && window_days >= criteria.min_window_days
                    && uplift >= criteria.min_uplift
                    && confidence >= criteria.confidence
                {
                    (Verdict::Ship, Some(best.policy_id.clone()), uplift, confidence)
                } else if enough_data && uplift_upper < -0.05 {
                    // Confidently worse than control across the interval.
                    (Verdict::Kill, None, uplift, 1.0 - best.p_value)
                } else if window_days >= criteria.max_window_days {
                    (Verdict::Iterate, None, uplift, confidence)
                } else {
                    (Verdict::Continue, None, uplift, confidence)
                }
            }
        };

        Decision {
            experiment_id: experiment.id,
            evaluated_at: now,
            verdict,
            winner_policy_id: winner,
            uplift,
            confidence,
            estimates,
            notes: None,
        }
    }

    /// Propensities the target policy assigns over the candidate set at its
    /// current state. Context-free slice; contextual experiments evaluate
    /// per-context offline via replay.
    async fn target_propensities(
        &self,
        experiment: &Experiment,
        policy_id: &str,
        candidates: &[String],
    ) -> DomainResult<Vec<f64>> {
        let policy_config = self
            .policies
            .get(experiment.id, policy_id)
            .await?
            .ok_or_else(|| DomainError::PolicyNotFound(policy_id.to_string()))?;
        let policy = build_policy(&policy_config.params)?;
        let slice = self.state.load_slice(experiment.id, policy_id, "").await?;
        let view = StateView::new(slice);
        let mut rng = SmallRng::seed_from_u64(seed_for(experiment.id, policy_id));
        policy.propensities(candidates, &view, &mut rng)
    }

    /// Run the evaluation loop until the task is aborted.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.evaluate_all(Utc::now()).await {
                tracing::error!(error = %e, "decision sweep failed");
            }
        }
    }
}

fn per_arm_means(events: &[ServeEvent]) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, u64)> = HashMap::new();
    for event in events {
        if let Some(reward) = event.reward {
            let entry = sums.entry(event.arm_id.clone()).or_insert((0.0, 0));
            entry.0 += reward;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(arm, (sum, n))| (arm, sum / n as f64))
        .collect()
}

/// Deterministic seed per (experiment, policy) so repeated evaluations of
/// the same window are reproducible.
fn seed_for(experiment_id: Uuid, policy_id: &str) -> u64 {
    let bytes = experiment_id.as_bytes();
    let mut seed = u64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8]));
    for b in policy_id.bytes() {
        seed = seed.wrapping_mul(31).wrapping_add(u64::from(b));
    }
    seed
}
