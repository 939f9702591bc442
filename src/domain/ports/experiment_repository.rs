//! Experiment repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Experiment, ExperimentStatus};

/// Repository interface for experiment persistence.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    /// Create a new experiment.
    async fn create(&self, experiment: &Experiment) -> DomainResult<()>;

    /// Get an experiment by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Experiment>>;

    /// Update an existing experiment.
    async fn update(&self, experiment: &Experiment) -> DomainResult<()>;

    /// List experiments, optionally filtered by status.
    async fn list(&self, status: Option<ExperimentStatus>) -> DomainResult<Vec<Experiment>>;

    /// Active experiments matching a surface, ordered by priority then
    /// recency so the first row governs a request.
    async fn active_for_surface(&self, surface: &str) -> DomainResult<Vec<Experiment>>;

    /// Atomically transition status, guarded on the current value.
    /// Returns false if the experiment was not in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
    ) -> DomainResult<bool>;
}
