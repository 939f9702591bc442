//! Guardrail check repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{GuardrailCheck, GuardrailName};

/// Repository interface for append-only guardrail check rows.
#[async_trait]
pub trait GuardrailRepository: Send + Sync {
    /// Record one check evaluation.
    async fn record(&self, check: &GuardrailCheck) -> DomainResult<()>;

    /// Most recent checks of one name, newest first.
    async fn recent(
        &self,
        experiment_id: Uuid,
        name: GuardrailName,
        limit: u32,
    ) -> DomainResult<Vec<GuardrailCheck>>;

    /// All checks of an experiment, newest first.
    async fn list(&self, experiment_id: Uuid, limit: u32) -> DomainResult<Vec<GuardrailCheck>>;

    /// Instant of the last rollback action, for rate limiting.
    async fn last_rollback_at(&self, experiment_id: Uuid) -> DomainResult<Option<DateTime<Utc>>>;
}
