//! Assignment repository port.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Assignment;

/// Repository interface for memoized user-to-policy assignments.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Insert unless a row already exists for (user, experiment).
    /// First write wins; the stored row is returned either way.
    async fn insert_if_absent(&self, assignment: &Assignment) -> DomainResult<Assignment>;

    /// Get the memoized assignment for a user.
    async fn get(&self, user_id: &str, experiment_id: Uuid) -> DomainResult<Option<Assignment>>;

    /// Serve counts per policy, for sample-ratio checks and audit.
    async fn count_by_policy(&self, experiment_id: Uuid) -> DomainResult<HashMap<String, u64>>;

    /// Drop all assignments of an experiment (salt change).
    async fn delete_for_experiment(&self, experiment_id: Uuid) -> DomainResult<u64>;
}
