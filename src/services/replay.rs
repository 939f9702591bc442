//! Offline replay: evaluate candidate policies on logged history.
//!
//! Replays a historical event log through a policy with fresh state using
//! the same `select`/`update` code path as online serving, scoring with
//! IPS/DR against the logged propensities. Deterministic for a fixed seed.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LoggedEvent, PolicyParams};
use crate::domain::policy::{build_policy, StateView};
use crate::domain::ports::ReplayRepository;
use crate::services::stats::{dr_estimate, ips_estimate, mean, OpeSample};

/// A contiguous slice of the log chosen for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub days: i64,
    pub events: u64,
    /// Mean distinct arms observed per day, the coverage term of the score.
    pub arm_coverage: f64,
}

/// Metrics from replaying one policy over a window.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub policy_label: String,
    pub events: u64,
    pub ips: f64,
    pub dr: f64,
    /// Mean reward the logging policy actually collected.
    pub logged_value: f64,
    /// Share of events where the replayed policy's top arm matched the log.
    pub match_rate: f64,
    /// Cumulative expected regret sampled every `CURVE_STRIDE` events.
    pub regret_curve: Vec<(u64, f64)>,
}

const CURVE_STRIDE: u64 = 100;

/// The offline replay service.
pub struct ReplayService {
    replay: Arc<dyn ReplayRepository>,
}

impl ReplayService {
    pub fn new(replay: Arc<dyn ReplayRepository>) -> Self {
        Self { replay }
    }

    /// Load JSONL historical records into the replay store.
    /// Returns (parsed, inserted).
    pub async fn load_logs(&self, path: &std::path::Path) -> DomainResult<(u64, u64)> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DomainError::Configuration(format!("cannot read {}: {e}", path.display())))?;

        let mut events = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: LoggedEvent = serde_json::from_str(line).map_err(|e| {
                DomainError::SerializationError(format!(
                    "{}:{}: {e}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            events.push(event);
        }
        let inserted = self.replay.append(&events).await?;
        tracing::info!(parsed = events.len(), inserted, "replay log loaded");
        Ok((events.len() as u64, inserted))
    }

    /// Choose the contiguous window maximizing event density times arm
    /// coverage, at least `min_days` long.
    pub async fn select_window(&self, min_days: i64) -> DomainResult<ReplayWindow> {
        let daily = self.replay.daily_stats().await?;
        if daily.is_empty() {
            return Err(DomainError::Configuration("replay store is empty".to_string()));
        }
        let mut days: Vec<(NaiveDate, u64, u64)> =
            daily.into_iter().map(|(d, (n, a))| (d, n, a)).collect();
        days.sort_by_key(|(d, _, _)| *d);

        let min_len = min_days.max(1) as usize;
        let mut best: Option<(f64, usize, usize)> = None;
        for start in 0..days.len() {
            for end in start..days.len() {
                let span = (days[end].0 - days[start].0).num_days() as usize + 1;
                if span < min_len {
                    continue;
                }
                let slice = &days[start..=end];
                let events: u64 = slice.iter().map(|(_, n, _)| n).sum();
                let coverage =
                    slice.iter().map(|(_, _, a)| *a as f64).sum::<f64>() / slice.len() as f64;
                let density = events as f64 / span as f64;
                let score = density * coverage;
                let better = best.map_or(true, |(s, _, _)| score > s);
                if better {
                    best = Some((score, start, end));
                }
            }
        }
        let (_, start, end) =
            best.ok_or_else(|| DomainError::Configuration(format!(
                "no contiguous window of at least {min_days} days"
            )))?;

        let from = days[start].0.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let to = days[end].0.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
            + ChronoDuration::days(1);
        let slice = &days[start..=end];
        Ok(ReplayWindow {
            from,
            to,
            days: (days[end].0 - days[start].0).num_days() + 1,
            events: slice.iter().map(|(_, n, _)| n).sum(),
            arm_coverage: slice.iter().map(|(_, _, a)| *a as f64).sum::<f64>()
                / slice.len() as f64,
        })
    }

    /// Replay one policy configuration over a window.
    pub async fn replay(
        &self,
        label: &str,
        params: &PolicyParams,
        window: &ReplayWindow,
        seed: u64,
    ) -> DomainResult<ReplayReport> {
        params.validate()?;
        let events = self.replay.events_between(window.from, window.to).await?;
        if events.is_empty() {
            return Err(DomainError::Configuration("selected window has no events".to_string()));
        }
        let candidates = self.replay.arms_between(window.from, window.to).await?;

        // Per-arm means over the window: the q-hat model for DR and the
        // reference for expected regret.
        let arm_means = logged_arm_means(&events);
        let best_mean = arm_means.values().copied().fold(f64::NEG_INFINITY, f64::max);

        let policy = build_policy(params)?;
        let (alpha0, beta0) = match params {
            PolicyParams::Thompson { alpha0, beta0, .. } => (*alpha0, *beta0),
            _ => (1.0, 1.0),
        };
        let replay_scope = Uuid::nil();
        let mut view = StateView::default();
        view.seed_missing(replay_scope, label, "", &candidates, alpha0, beta0);

        let mut rng = SmallRng::seed_from_u64(seed);
        let mut samples = Vec::with_capacity(events.len());
        let mut matches = 0u64;
        let mut cumulative_regret = 0.0;
        let mut regret_curve = Vec::new();

        for (i, event) in events.iter().enumerate() {
            let probs = policy.propensities(&candidates, &view, &mut rng)?;
            let Some(idx) = candidates.iter().position(|a| *a == event.arm_id) else {
                continue;
            };

            samples.push(OpeSample {
                reward: event.reward,
                logged_propensity: event.propensity,
                target_propensity: probs[idx],
                q_hat: arm_means.get(&event.arm_id).copied().unwrap_or(0.0),
            });

            let top = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i);
            if top == Some(idx) {
                matches += 1;
            }

            // Expected per-step regret of the replayed policy under the
            // window's empirical arm means.
            let expected: f64 = probs
                .iter()
                .zip(&candidates)
                .map(|(p, arm)| p * arm_means.get(arm).copied().unwrap_or(0.0))
                .sum();
            cumulative_regret += best_mean - expected;

            let step = i as u64 + 1;
            if step % CURVE_STRIDE == 0 || i + 1 == events.len() {
                regret_curve.push((step, cumulative_regret));
            }

            // Update state as if the logged serve had been ours. Every arm
            // in the window was pre-seeded from `candidates`.
            let Some(arm_state) = view.get_mut(&event.arm_id) else {
                continue;
            };
            let reward = match policy.kind() {
                crate::domain::models::PolicyKind::Thompson => event.reward.clamp(0.0, 1.0),
                _ => event.reward,
            };
            policy.update(arm_state, reward)?;
        }

        let floor = 0.01;
        Ok(ReplayReport {
            policy_label: label.to_string(),
            events: samples.len() as u64,
            ips: ips_estimate(&samples, floor),
            dr: dr_estimate(&samples, floor),
            logged_value: mean(&events.iter().map(|e| e.reward).collect::<Vec<_>>()),
            match_rate: if samples.is_empty() {
                0.0
            } else {
                matches as f64 / samples.len() as f64
            },
            regret_curve,
        })
    }
}

fn logged_arm_means(events: &[LoggedEvent]) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, u64)> = HashMap::new();
    for event in events {
        let entry = sums.entry(event.arm_id.clone()).or_insert((0.0, 0));
        entry.0 += event.reward;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(arm, (sum, n))| (arm, sum / n as f64))
        .collect()
}
