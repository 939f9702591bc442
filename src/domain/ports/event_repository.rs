//! Serve/reward event repository port.
//!
//! Serve events are append-only; the only in-place mutation is the one-shot
//! reward write, guarded by a compare-and-swap on `attribution_version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RewardEvent, ServeEvent};

/// Filter criteria for listing serve events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub experiment_id: Option<Uuid>,
    pub policy_id: Option<String>,
    pub arm_id: Option<String>,
    pub user_id: Option<String>,
    pub attributed_only: bool,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Aggregated serve statistics for one policy over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyServeStats {
    pub policy_id: String,
    pub serves: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub dropped: u64,
    pub attributed: u64,
    pub mean_reward: f64,
}

/// Repository interface for serve and reward events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append one serve event. `event_id` is unique; a duplicate append is
    /// a no-op so delivery retries stay exactly-once per id.
    async fn append_serve(&self, event: &ServeEvent) -> DomainResult<()>;

    /// Get a serve event by id.
    async fn get_serve(&self, event_id: Uuid) -> DomainResult<Option<ServeEvent>>;

    /// Append a downstream signal row (append-only).
    async fn append_reward(&self, reward: &RewardEvent) -> DomainResult<()>;

    /// All signal rows attached to a serve event, oldest first.
    async fn rewards_for_event(&self, event_id: Uuid) -> DomainResult<Vec<RewardEvent>>;

    /// Signal rows for (user, arm) within a time range, for serves ingested
    /// without an explicit event id.
    async fn serves_for_user_arm(
        &self,
        user_id: &str,
        arm_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<ServeEvent>>;

    /// One-shot reward write: succeeds only while `attribution_version`
    /// still equals `expected_version` and the reward is unset. Returns
    /// false on conflict.
    async fn attribute(
        &self,
        event_id: Uuid,
        reward: f64,
        reward_at: DateTime<Utc>,
        expected_version: i32,
    ) -> DomainResult<bool>;

    /// Unattributed serves of an experiment whose window closed before
    /// `cutoff`, oldest first.
    async fn unattributed_before(
        &self,
        experiment_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<ServeEvent>>;

    /// Per-policy aggregates over a window.
    async fn serve_stats(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<PolicyServeStats>>;

    /// p95 of serve latency over a window, None when the window is empty.
    async fn latency_p95(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Option<f64>>;

    /// Serve counts per arm over a window.
    async fn arm_counts(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<HashMap<String, u64>>;

    /// Attributed events of an experiment over a window, oldest first.
    async fn attributed_events(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<ServeEvent>>;

    /// List serve events with filters and paging.
    async fn list(&self, filter: EventFilter) -> DomainResult<Vec<ServeEvent>>;

    /// Earliest serve of an experiment, for decision windows.
    async fn first_serve_at(&self, experiment_id: Uuid) -> DomainResult<Option<DateTime<Utc>>>;
}
