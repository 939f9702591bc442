//! Arm catalog repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ArmCatalog;

/// Repository interface for versioned arm catalogs.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Store one catalog version. Versions are immutable once written.
    async fn put(&self, catalog: &ArmCatalog) -> DomainResult<()>;

    /// Fetch a pinned catalog version.
    async fn get(&self, experiment_id: Uuid, version: i64) -> DomainResult<Option<ArmCatalog>>;

    /// Highest stored version for an experiment.
    async fn latest_version(&self, experiment_id: Uuid) -> DomainResult<Option<i64>>;
}
