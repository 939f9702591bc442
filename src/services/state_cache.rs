//! Read-mostly caches for the serve path.
//!
//! Experiment configs, pinned catalogs, policy params, and state snapshots
//! are cached with a TTL so serve reads are bounded-stale (at most the TTL
//! behind storage) and never block on update propagation. State
//! transitions invalidate the affected entries.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ArmCatalog, ArmState, Experiment, PolicyConfig};
use crate::domain::ports::{CatalogRepository, ExperimentRepository, PolicyRepository, StateRepository};

const CACHE_MAX_CAPACITY: u64 = 10_000;

/// TTL caches over the config and state repositories.
pub struct ConfigCache {
    experiments_by_surface: Cache<String, Arc<Vec<Experiment>>>,
    catalogs: Cache<(Uuid, i64), Arc<ArmCatalog>>,
    policies: Cache<(Uuid, String), Arc<PolicyConfig>>,
    state_slices: Cache<(Uuid, String, String), Arc<Vec<ArmState>>>,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        fn build<K, V>(ttl: Duration) -> Cache<K, V>
        where
            K: std::hash::Hash + Eq + Send + Sync + 'static,
            V: Clone + Send + Sync + 'static,
        {
            Cache::builder()
                .max_capacity(CACHE_MAX_CAPACITY)
                .time_to_live(ttl)
                .build()
        }
        Self {
            experiments_by_surface: build(ttl),
            catalogs: build(ttl),
            policies: build(ttl),
            state_slices: build(ttl),
        }
    }

    /// Active experiments for a surface, priority order.
    pub async fn active_for_surface(
        &self,
        repo: &dyn ExperimentRepository,
        surface: &str,
    ) -> DomainResult<Arc<Vec<Experiment>>> {
        if let Some(cached) = self.experiments_by_surface.get(surface).await {
            return Ok(cached);
        }
        let experiments = Arc::new(repo.active_for_surface(surface).await?);
        self.experiments_by_surface
            .insert(surface.to_string(), experiments.clone())
            .await;
        Ok(experiments)
    }

    /// Pinned catalog version for an experiment.
    pub async fn catalog(
        &self,
        repo: &dyn CatalogRepository,
        experiment_id: Uuid,
        version: i64,
    ) -> DomainResult<Option<Arc<ArmCatalog>>> {
        let key = (experiment_id, version);
        if let Some(cached) = self.catalogs.get(&key).await {
            return Ok(Some(cached));
        }
        match repo.get(experiment_id, version).await? {
            Some(catalog) => {
                let catalog = Arc::new(catalog);
                self.catalogs.insert(key, catalog.clone()).await;
                Ok(Some(catalog))
            }
            None => Ok(None),
        }
    }

    /// Policy configuration row.
    pub async fn policy(
        &self,
        repo: &dyn PolicyRepository,
        experiment_id: Uuid,
        policy_id: &str,
    ) -> DomainResult<Option<Arc<PolicyConfig>>> {
        let key = (experiment_id, policy_id.to_string());
        if let Some(cached) = self.policies.get(&key).await {
            return Ok(Some(cached));
        }
        match repo.get(experiment_id, policy_id).await? {
            Some(policy) => {
                let policy = Arc::new(policy);
                self.policies.insert(key, policy.clone()).await;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// State slice for one (experiment, policy, context). Reads may lag
    /// storage by up to the TTL; the serve path tolerates that.
    pub async fn state_slice(
        &self,
        repo: &dyn StateRepository,
        experiment_id: Uuid,
        policy_id: &str,
        context_key: &str,
    ) -> DomainResult<Arc<Vec<ArmState>>> {
        let key = (experiment_id, policy_id.to_string(), context_key.to_string());
        if let Some(cached) = self.state_slices.get(&key).await {
            return Ok(cached);
        }
        let slice = Arc::new(repo.load_slice(experiment_id, policy_id, context_key).await?);
        self.state_slices.insert(key, slice.clone()).await;
        Ok(slice)
    }

    /// Drop everything cached for a surface (status transition).
    pub async fn invalidate_surface(&self, surface: &str) {
        self.experiments_by_surface.invalidate(surface).await;
    }

    /// Drop all cached entries. Cheap, and transitions are rare.
    pub fn invalidate_all(&self) {
        self.experiments_by_surface.invalidate_all();
        self.catalogs.invalidate_all();
        self.policies.invalidate_all();
        self.state_slices.invalidate_all();
    }
}
