//! Durable reward-update queue port.
//!
//! Attributed rewards travel to the state updater through this queue
//! (topic `reward_updates`). Implementations may co-locate it with the
//! main database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// One attributed reward bound for a state row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardUpdate {
    pub event_id: Uuid,
    pub experiment_id: Uuid,
    pub policy_id: String,
    pub arm_id: String,
    pub context_key: String,
    pub reward: f64,
}

/// A dequeued update with its delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedUpdate {
    pub id: i64,
    pub update: RewardUpdate,
    pub attempts: u32,
}

/// Queue interface for reward updates.
#[async_trait]
pub trait RewardQueue: Send + Sync {
    /// Enqueue one update. Duplicate event ids are dropped so attribution
    /// retries enqueue at most one update per serve.
    async fn enqueue(&self, update: &RewardUpdate) -> DomainResult<()>;

    /// Claim up to `limit` updates that are due at `now`.
    async fn dequeue(&self, limit: u32, now: DateTime<Utc>) -> DomainResult<Vec<QueuedUpdate>>;

    /// Acknowledge successful processing.
    async fn ack(&self, id: i64) -> DomainResult<()>;

    /// Return an update to the queue for a later attempt.
    async fn nack(&self, id: i64, next_attempt_at: DateTime<Utc>) -> DomainResult<()>;

    /// Drop an update after exhausting its attempts.
    async fn discard(&self, id: i64) -> DomainResult<()>;

    /// Pending update count.
    async fn depth(&self) -> DomainResult<u64>;
}
