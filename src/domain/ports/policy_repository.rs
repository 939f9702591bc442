//! Policy repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::PolicyConfig;

/// Repository interface for policy configuration rows.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Create a policy for an experiment.
    async fn create(&self, policy: &PolicyConfig) -> DomainResult<()>;

    /// Get one policy of an experiment.
    async fn get(&self, experiment_id: Uuid, policy_id: &str) -> DomainResult<Option<PolicyConfig>>;

    /// All policies of an experiment.
    async fn list_for_experiment(&self, experiment_id: Uuid) -> DomainResult<Vec<PolicyConfig>>;
}
