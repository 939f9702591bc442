//! State updater: drains the reward queue into sufficient-statistics rows.
//!
//! Per-key writes are serialized by an optimistic CAS on the row version
//! with bounded retry, so two concurrent updates both land and counters
//! never go backwards. Cross-key updates carry no ordering guarantee.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ArmState, AttributionConfig, PolicyParams, StateKey};
use crate::domain::ports::{PolicyRepository, RewardQueue, RewardUpdate, StateRepository};

/// CAS retries before surfacing a StateConflict.
const CAS_MAX_ATTEMPTS: u32 = 5;

/// The queue-driven state update worker.
pub struct StateUpdater {
    policies: Arc<dyn PolicyRepository>,
    state: Arc<dyn StateRepository>,
    queue: Arc<dyn RewardQueue>,
    config: AttributionConfig,
}

impl StateUpdater {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        state: Arc<dyn StateRepository>,
        queue: Arc<dyn RewardQueue>,
        config: AttributionConfig,
    ) -> Self {
        Self { policies, state, queue, config }
    }

    /// Drain one batch. Returns the number of updates applied.
    pub async fn drain(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let batch = self.queue.dequeue(self.config.batch_size, now).await?;
        let mut applied = 0u64;

        for item in batch {
            match self.apply(&item.update).await {
                Ok(()) => {
                    self.queue.ack(item.id).await?;
                    applied += 1;
                }
                Err(e) if item.attempts < self.config.max_attempts => {
                    // Exponential backoff: 2^attempts seconds until redelivery.
                    let delay = ChronoDuration::seconds(1i64 << item.attempts.min(10));
                    tracing::warn!(
                        event_id = %item.update.event_id,
                        attempts = item.attempts,
                        error = %e,
                        "state update failed; retrying"
                    );
                    self.queue.nack(item.id, now + delay).await?;
                }
                Err(e) => {
                    tracing::error!(
                        event_id = %item.update.event_id,
                        attempts = item.attempts,
                        error = %e,
                        "state update dropped after exhausting attempts"
                    );
                    self.queue.discard(item.id).await?;
                }
            }
        }
        Ok(applied)
    }

    /// Apply one update through the CAS loop.
    async fn apply(&self, update: &RewardUpdate) -> DomainResult<()> {
        let policy = self
            .policies
            .get(update.experiment_id, &update.policy_id)
            .await?
            .ok_or_else(|| DomainError::PolicyNotFound(update.policy_id.clone()))?;
        let kind = policy.kind();
        let (alpha0, beta0) = match &policy.params {
            PolicyParams::Thompson { alpha0, beta0, .. } => (*alpha0, *beta0),
            _ => (1.0, 1.0),
        };

        let key = StateKey::new(
            update.experiment_id,
            update.policy_id.clone(),
            update.arm_id.clone(),
            update.context_key.clone(),
        );

        for _ in 0..CAS_MAX_ATTEMPTS {
            let mut row = match self.state.get(&key).await? {
                Some(row) => row,
                None => {
                    // Late-seeded arm (e.g. catalog grew); create the row
                    // and re-read so the CAS sees a stored version.
                    self.state
                        .seed(&[ArmState::seeded(key.clone(), alpha0, beta0)])
                        .await?;
                    self.state
                        .get(&key)
                        .await?
                        .ok_or_else(|| DomainError::DatabaseError("seeded row vanished".to_string()))?
                }
            };

            let expected = row.version;
            row.apply_reward(kind, update.reward)?;
            row.version = expected + 1;

            if self.state.compare_and_update(&row, expected).await? {
                return Ok(());
            }
        }

        Err(DomainError::StateConflict {
            key: key.to_string(),
            attempts: CAS_MAX_ATTEMPTS,
        })
    }

    /// Run the drain loop until the task is aborted.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if let Err(e) = self.drain(Utc::now()).await {
                tracing::error!(error = %e, "reward queue drain failed");
            }
        }
    }
}
