//! Windowed, idempotent reward attribution.
//!
//! Downstream signals are attached to serve events eagerly on ingestion and
//! finalized to zero by a periodic sweeper once the attribution window
//! closes. The reward column is write-once: attribution races are settled
//! by the CAS on `attribution_version`, and a repeat ingestion is a no-op
//! when the value would not change.

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AttributionConfig, Experiment, RewardEvent, RewardKind, RewardMapping, ServeEvent,
};
use crate::domain::ports::{
    EventRepository, ExperimentRepository, RewardQueue, RewardUpdate,
};

/// Result of one ingestion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// The reward was written and an update enqueued.
    Attributed(f64),
    /// The event already carries this reward; nothing changed.
    Unchanged,
    /// The signal does not qualify under the experiment's mapping (yet).
    Pending,
}

/// The reward attribution service.
pub struct RewardAttributor {
    experiments: Arc<dyn ExperimentRepository>,
    events: Arc<dyn EventRepository>,
    queue: Arc<dyn RewardQueue>,
    config: AttributionConfig,
}

impl RewardAttributor {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        events: Arc<dyn EventRepository>,
        queue: Arc<dyn RewardQueue>,
        config: AttributionConfig,
    ) -> Self {
        Self { experiments, events, queue, config }
    }

    /// Ingest a downstream signal for a known serve event.
    pub async fn ingest(
        &self,
        event_id: Uuid,
        kind: RewardKind,
        value: f64,
        at: DateTime<Utc>,
    ) -> DomainResult<IngestOutcome> {
        kind.validate_value(value)?;

        let event = self
            .events
            .get_serve(event_id)
            .await?
            .ok_or(DomainError::EventNotFound(event_id))?;
        let experiment = self
            .experiments
            .get(event.experiment_id)
            .await?
            .ok_or(DomainError::ExperimentNotFound(event.experiment_id))?;

        let closes_at = event.window_closes_at(experiment.attribution_window());
        if at > closes_at {
            return Err(DomainError::AttributionClosed(event_id));
        }
        if at < event.served_at {
            tracing::warn!(event_id = %event_id, "signal predates serve; ignored");
            return Ok(IngestOutcome::Pending);
        }

        self.events
            .append_reward(&RewardEvent::new(event_id, kind, value, at))
            .await?;

        let signals = self.events.rewards_for_event(event_id).await?;
        let Some(reward) = compose_reward(experiment.reward_mapping, &signals) else {
            return Ok(IngestOutcome::Pending);
        };

        self.write_once(&event, &experiment, reward, at).await
    }

    /// Ingest by (user, arm, instant) when the host lost the event id.
    /// Attaches to the most recent qualifying serve.
    pub async fn ingest_by_user_arm(
        &self,
        user_id: &str,
        arm_id: &str,
        at: DateTime<Utc>,
        kind: RewardKind,
        value: f64,
    ) -> DomainResult<IngestOutcome> {
        kind.validate_value(value)?;
        // Widest window across experiments bounds the scan; per-event windows
        // are enforced in `ingest`.
        let horizon = at - chrono::Duration::days(7);
        let serves = self
            .events
            .serves_for_user_arm(user_id, arm_id, horizon, at)
            .await?;
        let Some(event) = serves.first() else {
            return Err(DomainError::EventNotFound(Uuid::nil()));
        };
        self.ingest(event.event_id, kind, value, at).await
    }

    /// Write the reward if the event does not carry one yet. Idempotent:
    /// re-running with the same value is a no-op, a different value after
    /// the first write is discarded (the column is write-once).
    async fn write_once(
        &self,
        event: &ServeEvent,
        experiment: &Experiment,
        reward: f64,
        at: DateTime<Utc>,
    ) -> DomainResult<IngestOutcome> {
        if let Some(existing) = event.reward {
            if (existing - reward).abs() < f64::EPSILON {
                return Ok(IngestOutcome::Unchanged);
            }
            tracing::warn!(
                event_id = %event.event_id,
                existing,
                candidate = reward,
                "reward already written; later signal discarded"
            );
            return Ok(IngestOutcome::Unchanged);
        }

        let written = self
            .events
            .attribute(event.event_id, reward, at, event.attribution_version)
            .await?;
        if !written {
            // Lost the race; whoever won wrote the reward first.
            let current = self
                .events
                .get_serve(event.event_id)
                .await?
                .ok_or(DomainError::EventNotFound(event.event_id))?;
            if current.reward.map_or(false, |r| (r - reward).abs() < f64::EPSILON) {
                return Ok(IngestOutcome::Unchanged);
            }
            return Ok(IngestOutcome::Unchanged);
        }

        self.queue
            .enqueue(&RewardUpdate {
                event_id: event.event_id,
                experiment_id: event.experiment_id,
                policy_id: event.policy_id.clone(),
                arm_id: event.arm_id.clone(),
                context_key: event.context_key.clone(),
                reward,
            })
            .await?;

        tracing::debug!(
            event_id = %event.event_id,
            experiment_id = %experiment.id,
            reward,
            "reward attributed"
        );
        Ok(IngestOutcome::Attributed(reward))
    }

    /// Finalize events whose window closed without a qualifying signal.
    /// Returns the number of events finalized.
    pub async fn sweep(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let mut finalized = 0u64;
        for experiment in self.experiments.list(None).await? {
            let cutoff = now - experiment.attribution_window();
            let batch_size = self.config.batch_size;
            let stale = retry_transient(|| {
                let events = self.events.clone();
                let id = experiment.id;
                async move { events.unattributed_before(id, cutoff, batch_size).await }
            })
            .await?;

            for event in stale {
                let signals = self.events.rewards_for_event(event.event_id).await?;
                let reward =
                    compose_reward(experiment.reward_mapping, &signals).unwrap_or(0.0);
                match self.write_once(&event, &experiment, reward, now).await? {
                    IngestOutcome::Attributed(_) => finalized += 1,
                    IngestOutcome::Unchanged | IngestOutcome::Pending => {}
                }
            }
        }
        if finalized > 0 {
            tracing::info!(finalized, "attribution sweep closed windows");
        }
        Ok(finalized)
    }

    /// Run the sweeper on its configured interval until the task is aborted.
    pub async fn run(&self) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                tracing::error!(error = %e, "attribution sweep failed");
            }
        }
    }
}

/// Compose a reward from the signals seen so far, honoring the experiment's
/// mapping. `None` means no qualifying signal yet.
///
/// Conflicts resolve by priority (custom > rating > thumbs > click); within
/// a priority class the most recent signal wins.
pub fn compose_reward(mapping: RewardMapping, signals: &[RewardEvent]) -> Option<f64> {
    let pick = |filter: &dyn Fn(&&RewardEvent) -> bool| {
        signals
            .iter()
            .filter(filter)
            .max_by_key(|s| (s.kind.priority(), s.at))
    };

    let chosen = match mapping {
        RewardMapping::BinaryClick => pick(&|s| s.kind == RewardKind::Click)?,
        RewardMapping::ScaledRating => pick(&|s| s.kind == RewardKind::Rating)?,
        RewardMapping::Composite => pick(&|_| true)?,
    };
    Some(chosen.kind.map_value(chosen.value))
}

/// Retry a storage call on transient errors with exponential backoff.
async fn retry_transient<T, F, Fut>(operation: F) -> DomainResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DomainResult<T>>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_elapsed_time(Some(Duration::from_secs(5)))
        .build();
    backoff::future::retry(policy, || async {
        operation().await.map_err(|e| {
            if e.is_transient() {
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(kind: RewardKind, value: f64, secs: i64) -> RewardEvent {
        RewardEvent::new(
            Uuid::nil(),
            kind,
            value,
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_composite_prefers_rating_over_click() {
        let signals = vec![
            signal(RewardKind::Click, 1.0, 10),
            signal(RewardKind::Rating, 5.0, 20),
        ];
        let reward = compose_reward(RewardMapping::Composite, &signals).unwrap();
        assert!((reward - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_composite_thumbs_beat_click() {
        let signals = vec![
            signal(RewardKind::Click, 1.0, 30),
            signal(RewardKind::ThumbsDown, 0.0, 10),
        ];
        let reward = compose_reward(RewardMapping::Composite, &signals).unwrap();
        assert!((reward - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_binary_click_ignores_ratings() {
        let signals = vec![signal(RewardKind::Rating, 5.0, 10)];
        assert_eq!(compose_reward(RewardMapping::BinaryClick, &signals), None);

        let signals = vec![signal(RewardKind::Click, 1.0, 10)];
        assert!((compose_reward(RewardMapping::BinaryClick, &signals).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_most_recent_within_priority_wins() {
        let signals = vec![
            signal(RewardKind::Rating, 1.0, 10),
            signal(RewardKind::Rating, 5.0, 20),
        ];
        let reward = compose_reward(RewardMapping::ScaledRating, &signals).unwrap();
        assert!((reward - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_signals_is_pending() {
        assert_eq!(compose_reward(RewardMapping::Composite, &[]), None);
    }
}
