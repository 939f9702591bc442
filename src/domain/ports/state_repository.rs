//! Policy arm state repository port.
//!
//! State is stored as rows, not blobs: one row per
//! (experiment, policy, arm, context) key, updated atomically per row.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ArmState, StateKey};

/// Repository interface for sufficient-statistics rows.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Seed rows with priors; rows that already exist are left untouched.
    async fn seed(&self, states: &[ArmState]) -> DomainResult<()>;

    /// Get one row by composite key.
    async fn get(&self, key: &StateKey) -> DomainResult<Option<ArmState>>;

    /// Load the slice for one (experiment, policy, context).
    async fn load_slice(
        &self,
        experiment_id: Uuid,
        policy_id: &str,
        context_key: &str,
    ) -> DomainResult<Vec<ArmState>>;

    /// All rows of an experiment (for summaries and q-hat models).
    async fn load_for_experiment(&self, experiment_id: Uuid) -> DomainResult<Vec<ArmState>>;

    /// Compare-and-swap write: persists `state` (whose `version` has already
    /// been bumped) only if the stored row still carries `expected_version`.
    /// Returns false on conflict so the caller can re-read and retry.
    async fn compare_and_update(
        &self,
        state: &ArmState,
        expected_version: i64,
    ) -> DomainResult<bool>;
}
