//! Replay log repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::LoggedEvent;

/// Repository interface for the offline replay store.
#[async_trait]
pub trait ReplayRepository: Send + Sync {
    /// Append historical records; duplicate event ids are ignored.
    async fn append(&self, events: &[LoggedEvent]) -> DomainResult<u64>;

    /// Earliest and latest record instants.
    async fn bounds(&self) -> DomainResult<Option<(DateTime<Utc>, DateTime<Utc>)>>;

    /// Per-day record counts and distinct-arm counts, for window selection.
    async fn daily_stats(&self) -> DomainResult<HashMap<chrono::NaiveDate, (u64, u64)>>;

    /// Records within a window, oldest first.
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<LoggedEvent>>;

    /// Distinct arm ids within a window.
    async fn arms_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<String>>;
}
