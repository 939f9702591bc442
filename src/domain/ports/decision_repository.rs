//! Decision repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Decision;

/// Repository interface for append-only decision rows.
#[async_trait]
pub trait DecisionRepository: Send + Sync {
    /// Record one decision evaluation.
    async fn record(&self, decision: &Decision) -> DomainResult<()>;

    /// Most recent decision for an experiment.
    async fn latest(&self, experiment_id: Uuid) -> DomainResult<Option<Decision>>;

    /// All decisions of an experiment, newest first.
    async fn list(&self, experiment_id: Uuid) -> DomainResult<Vec<Decision>>;
}
