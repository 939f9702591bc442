//! Guardrail monitor: periodic safety checks with auto-rollback.
//!
//! Five checks per experiment over a sliding window. A failing check writes
//! an append-only row; rollback transitions the experiment to killed,
//! rate-limited to one per cooldown unless a critical check fired.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Experiment, ExperimentStatus, GuardrailAction, GuardrailCheck, GuardrailName,
    GuardrailStatus, MonitorConfig,
};
use crate::domain::ports::{
    EventRepository, ExperimentRepository, GuardrailRepository, PolicyServeStats,
};
use crate::services::experiment_service::ExperimentService;
use crate::services::stats::chi_squared_p;

/// The guardrail monitor service.
pub struct GuardrailMonitor {
    experiments: Arc<dyn ExperimentRepository>,
    events: Arc<dyn EventRepository>,
    guardrails: Arc<dyn GuardrailRepository>,
    lifecycle: Arc<ExperimentService>,
    config: MonitorConfig,
}

impl GuardrailMonitor {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        events: Arc<dyn EventRepository>,
        guardrails: Arc<dyn GuardrailRepository>,
        lifecycle: Arc<ExperimentService>,
        config: MonitorConfig,
    ) -> Self {
        Self { experiments, events, guardrails, lifecycle, config }
    }

    /// Evaluate every active experiment. Experiments are independent, so
    /// they are checked concurrently.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> DomainResult<()> {
        let experiments = self.experiments.list(Some(ExperimentStatus::Active)).await?;
        let results =
            future::join_all(experiments.iter().map(|e| self.evaluate(e, now))).await;
        for (experiment, result) in experiments.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(
                    experiment_id = %experiment.id,
                    error = %e,
                    "guardrail evaluation failed"
                );
            }
        }
        Ok(())
    }

    /// Evaluate one experiment and act on the results. Re-running on the
    /// same window is idempotent: identical check rows collapse and a
    /// killed experiment cannot be killed twice.
    pub async fn evaluate(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<GuardrailCheck>> {
        let config = &experiment.guardrail_config;
        let from = now - ChronoDuration::seconds(config.window_secs);
        let stats = self.events.serve_stats(experiment.id, from, now).await?;
        let serves: u64 = stats.iter().map(|s| s.serves).sum();
        if serves < config.min_serves {
            tracing::trace!(experiment_id = %experiment.id, serves, "window too small for guardrails");
            return Ok(Vec::new());
        }

        let mut checks = Vec::new();
        checks.push(self.check_error_rate(experiment, &stats, serves, now));
        if let Some(check) = self.check_latency(experiment, from, now).await? {
            checks.push(check);
        }
        if let Some(check) = self.check_concentration(experiment, from, now, serves).await? {
            checks.push(check);
        }
        if let Some(check) = self.check_reward_drop(experiment, &stats, now) {
            checks.push(check);
        }
        if let Some(check) = self.check_sample_ratio(experiment, &stats, now) {
            checks.push(check);
        }

        // Rate-limit non-critical rollbacks before recording, so the rows
        // reflect the action actually taken.
        let wants_rollback = checks.iter().any(|c| c.action == GuardrailAction::Rollback);
        let critical = checks
            .iter()
            .any(|c| c.action == GuardrailAction::Rollback && c.name.is_critical());
        if wants_rollback && !critical && self.in_cooldown(experiment, now).await? {
            tracing::warn!(experiment_id = %experiment.id, "rollback suppressed by rate limit");
            for check in &mut checks {
                if check.action == GuardrailAction::Rollback {
                    check.action = GuardrailAction::Alert;
                }
            }
        }

        for check in &checks {
            self.guardrails.record(check).await?;
        }
        self.act_on(experiment, &checks).await?;
        Ok(checks)
    }

    async fn in_cooldown(&self, experiment: &Experiment, now: DateTime<Utc>) -> DomainResult<bool> {
        let Some(last) = self.guardrails.last_rollback_at(experiment.id).await? else {
            return Ok(false);
        };
        let cooldown = ChronoDuration::seconds(experiment.guardrail_config.rollback_cooldown_secs);
        Ok(now - last < cooldown)
    }

    fn check_error_rate(
        &self,
        experiment: &Experiment,
        stats: &[PolicyServeStats],
        serves: u64,
        now: DateTime<Utc>,
    ) -> GuardrailCheck {
        let failures: u64 = stats.iter().map(|s| s.errors + s.timeouts + s.dropped).sum();
        let rate = failures as f64 / serves as f64;
        let threshold = experiment.guardrail_config.max_error_rate;
        let failed = rate > threshold;
        GuardrailCheck {
            experiment_id: experiment.id,
            at: now,
            name: GuardrailName::ErrorRate,
            value: rate,
            threshold,
            status: if failed { GuardrailStatus::Fail } else { GuardrailStatus::Pass },
            action: if failed { GuardrailAction::Rollback } else { GuardrailAction::None },
        }
    }

    async fn check_latency(
        &self,
        experiment: &Experiment,
        from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<GuardrailCheck>> {
        let Some(p95) = self.events.latency_p95(experiment.id, from, now).await? else {
            return Ok(None);
        };
        let threshold = experiment.guardrail_config.max_latency_p95_ms;
        let failed = p95 > threshold;
        Ok(Some(GuardrailCheck {
            experiment_id: experiment.id,
            at: now,
            name: GuardrailName::LatencyP95,
            value: p95,
            threshold,
            status: if failed { GuardrailStatus::Fail } else { GuardrailStatus::Pass },
            action: if failed { GuardrailAction::Rollback } else { GuardrailAction::None },
        }))
    }

    /// Arm concentration alerts on first breach and escalates to rollback
    /// when the breach persists across consecutive windows.
    async fn check_concentration(
        &self,
        experiment: &Experiment,
        from: DateTime<Utc>,
        now: DateTime<Utc>,
        serves: u64,
    ) -> DomainResult<Option<GuardrailCheck>> {
        let counts = self.events.arm_counts(experiment.id, from, now).await?;
        let Some(max_count) = counts.values().copied().max() else {
            return Ok(None);
        };
        let share = max_count as f64 / serves as f64;
        let config = &experiment.guardrail_config;
        let failed = share > config.max_arm_concentration;

        let action = if failed {
            let lookback = config.concentration_windows.saturating_sub(1);
            let prior = self
                .guardrails
                .recent(experiment.id, GuardrailName::ArmConcentration, lookback)
                .await?;
            let persistent = lookback > 0
                && prior.len() as u32 >= lookback
                && prior.iter().all(|c| c.status == GuardrailStatus::Fail);
            if persistent {
                GuardrailAction::Rollback
            } else {
                GuardrailAction::Alert
            }
        } else {
            GuardrailAction::None
        };

        Ok(Some(GuardrailCheck {
            experiment_id: experiment.id,
            at: now,
            name: GuardrailName::ArmConcentration,
            value: share,
            threshold: config.max_arm_concentration,
            status: if failed { GuardrailStatus::Fail } else { GuardrailStatus::Pass },
            action,
        }))
    }

    fn check_reward_drop(
        &self,
        experiment: &Experiment,
        stats: &[PolicyServeStats],
        now: DateTime<Utc>,
    ) -> Option<GuardrailCheck> {
        let control = stats
            .iter()
            .find(|s| s.policy_id == experiment.default_policy_id)?;
        if control.attributed == 0 || control.mean_reward.abs() < f64::EPSILON {
            return None;
        }
        let treatment: Vec<&PolicyServeStats> = stats
            .iter()
            .filter(|s| s.policy_id != experiment.default_policy_id && s.attributed > 0)
            .collect();
        if treatment.is_empty() {
            return None;
        }
        let attributed: u64 = treatment.iter().map(|s| s.attributed).sum();
        let treatment_mean = treatment
            .iter()
            .map(|s| s.mean_reward * s.attributed as f64)
            .sum::<f64>()
            / attributed as f64;

        let relative = (treatment_mean - control.mean_reward) / control.mean_reward.abs();
        let threshold = experiment.guardrail_config.min_relative_reward;
        let failed = relative < threshold;
        Some(GuardrailCheck {
            experiment_id: experiment.id,
            at: now,
            name: GuardrailName::RewardDrop,
            value: relative,
            threshold,
            status: if failed { GuardrailStatus::Fail } else { GuardrailStatus::Pass },
            action: if failed { GuardrailAction::Rollback } else { GuardrailAction::None },
        })
    }

    /// Sample-ratio mismatch: observed per-policy serve split against the
    /// traffic plan, chi-squared. Alert only; a skewed split means the data
    /// is suspect, not that users are at risk.
    fn check_sample_ratio(
        &self,
        experiment: &Experiment,
        stats: &[PolicyServeStats],
        now: DateTime<Utc>,
    ) -> Option<GuardrailCheck> {
        let plan = &experiment.traffic_plan;
        let mut observed = Vec::with_capacity(plan.entries.len());
        let mut shares = Vec::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            let count = stats
                .iter()
                .find(|s| s.policy_id == entry.policy_id)
                .map_or(0, |s| s.serves);
            observed.push(count);
            shares.push(entry.share);
        }
        let p = chi_squared_p(&observed, &shares)?;
        let threshold = experiment.guardrail_config.sample_ratio_p_threshold;
        let failed = p < threshold;
        Some(GuardrailCheck {
            experiment_id: experiment.id,
            at: now,
            name: GuardrailName::SampleRatio,
            value: p,
            threshold,
            status: if failed { GuardrailStatus::Fail } else { GuardrailStatus::Pass },
            action: if failed { GuardrailAction::Alert } else { GuardrailAction::None },
        })
    }

    /// Execute the strongest action among the recorded checks.
    async fn act_on(&self, experiment: &Experiment, checks: &[GuardrailCheck]) -> DomainResult<()> {
        let rollbacks: Vec<&GuardrailCheck> = checks
            .iter()
            .filter(|c| c.action == GuardrailAction::Rollback)
            .collect();
        for check in checks.iter().filter(|c| c.action == GuardrailAction::Alert) {
            tracing::warn!(
                experiment_id = %experiment.id,
                check = check.name.as_str(),
                value = check.value,
                threshold = check.threshold,
                "guardrail alert"
            );
        }
        if rollbacks.is_empty() {
            return Ok(());
        }

        let reason = rollbacks
            .iter()
            .map(|c| format!("{}={:.4} (threshold {:.4})", c.name.as_str(), c.value, c.threshold))
            .collect::<Vec<_>>()
            .join(", ");
        self.lifecycle
            .kill(experiment.id, &format!("guardrail rollback: {reason}"))
            .await
    }

    /// Run the evaluation loop until the task is aborted.
    pub async fn run(&self) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.check_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.evaluate_all(Utc::now()).await {
                tracing::error!(error = %e, "guardrail sweep failed");
            }
        }
    }
}
