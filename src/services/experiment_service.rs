//! Experiment lifecycle management.
//!
//! Owns the status machine, prior seeding on start, salt resets, traffic
//! ramps, and the kill path the guardrail monitor triggers. Transitions are
//! single guarded UPDATEs, so no partial state is ever observable.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ArmCatalog, ArmState, Decision, DecisionConfig, Experiment, ExperimentStatus,
    GuardrailConfig, PolicyConfig, PolicyParams, StateKey, TrafficPlan, Verdict,
};
use crate::domain::ports::{
    AssignmentRepository, CatalogRepository, DecisionRepository, ExperimentRepository,
    PolicyRepository, StateRepository,
};
use crate::services::state_cache::ConfigCache;

/// Administrative service over experiment lifecycle and config.
pub struct ExperimentService {
    experiments: Arc<dyn ExperimentRepository>,
    policies: Arc<dyn PolicyRepository>,
    catalogs: Arc<dyn CatalogRepository>,
    state: Arc<dyn StateRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    decisions: Arc<dyn DecisionRepository>,
    cache: Arc<ConfigCache>,
}

impl ExperimentService {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        policies: Arc<dyn PolicyRepository>,
        catalogs: Arc<dyn CatalogRepository>,
        state: Arc<dyn StateRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        decisions: Arc<dyn DecisionRepository>,
        cache: Arc<ConfigCache>,
    ) -> Self {
        Self { experiments, policies, catalogs, state, assignments, decisions, cache }
    }

    /// Create a draft experiment with its policies and pinned catalog.
    pub async fn create(
        &self,
        experiment: Experiment,
        policies: Vec<PolicyConfig>,
        catalog: ArmCatalog,
    ) -> DomainResult<Uuid> {
        experiment.validate()?;
        catalog.validate()?;

        let ids: Vec<&str> = policies.iter().map(|p| p.id.as_str()).collect();
        for planned in experiment.traffic_plan.policy_ids() {
            if !ids.contains(&planned) {
                return Err(DomainError::Configuration(format!(
                    "traffic plan references unknown policy {planned}"
                )));
            }
        }
        if !ids.contains(&experiment.default_policy_id.as_str()) {
            return Err(DomainError::Configuration(format!(
                "default policy {} is not defined",
                experiment.default_policy_id
            )));
        }

        self.experiments.create(&experiment).await?;
        for policy in &policies {
            self.policies.create(policy).await?;
        }
        self.catalogs.put(&catalog).await?;
        tracing::info!(experiment_id = %experiment.id, name = %experiment.name, "experiment created");
        Ok(experiment.id)
    }

    /// Start a draft experiment: seed priors, then admit traffic.
    pub async fn start(&self, id: Uuid) -> DomainResult<()> {
        self.seed_priors(id).await?;
        self.transition(id, ExperimentStatus::Draft, ExperimentStatus::Active).await
    }

    pub async fn pause(&self, id: Uuid) -> DomainResult<()> {
        self.transition(id, ExperimentStatus::Active, ExperimentStatus::Paused).await
    }

    pub async fn resume(&self, id: Uuid) -> DomainResult<()> {
        self.transition(id, ExperimentStatus::Paused, ExperimentStatus::Active).await
    }

    pub async fn end(&self, id: Uuid) -> DomainResult<()> {
        let current = self.status_of(id).await?;
        self.transition(id, current, ExperimentStatus::Ended).await
    }

    /// Kill an experiment. Serves bypass it immediately; a terminal
    /// decision row records why.
    pub async fn kill(&self, id: Uuid, reason: &str) -> DomainResult<()> {
        let current = self.status_of(id).await?;
        self.transition(id, current, ExperimentStatus::Killed).await?;

        self.decisions
            .record(&Decision {
                experiment_id: id,
                evaluated_at: Utc::now(),
                verdict: Verdict::Kill,
                winner_policy_id: None,
                uplift: 0.0,
                confidence: 0.0,
                estimates: Vec::new(),
                notes: Some(reason.to_string()),
            })
            .await?;
        tracing::warn!(experiment_id = %id, reason, "experiment killed");
        Ok(())
    }

    /// Grow the traffic fraction (ramp). Shrinking while active is rejected.
    pub async fn ramp(&self, id: Uuid, fraction: f64) -> DomainResult<()> {
        let mut experiment = self.get(id).await?;
        experiment.set_traffic_fraction(fraction)?;
        self.experiments.update(&experiment).await?;
        self.cache.invalidate_all();
        Ok(())
    }

    /// Change the salt. Resets every assignment of the experiment.
    pub async fn set_salt(&self, id: Uuid, salt: &str) -> DomainResult<()> {
        if salt.is_empty() {
            return Err(DomainError::Configuration("salt must not be empty".to_string()));
        }
        let mut experiment = self.get(id).await?;
        experiment.salt = salt.to_string();
        experiment.updated_at = Utc::now();
        self.experiments.update(&experiment).await?;
        let dropped = self.assignments.delete_for_experiment(id).await?;
        self.cache.invalidate_all();
        tracing::info!(experiment_id = %id, dropped, "salt changed; assignments reset");
        Ok(())
    }

    /// Replace the traffic plan. Every planned policy must exist.
    pub async fn set_traffic_plan(&self, id: Uuid, plan: TrafficPlan) -> DomainResult<()> {
        plan.validate()?;
        let mut experiment = self.get(id).await?;
        let known: Vec<String> = self
            .policies
            .list_for_experiment(id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        for planned in plan.policy_ids() {
            if !known.iter().any(|k| k == planned) {
                return Err(DomainError::Configuration(format!(
                    "traffic plan references unknown policy {planned}"
                )));
            }
        }
        experiment.traffic_plan = plan;
        experiment.updated_at = Utc::now();
        self.experiments.update(&experiment).await?;
        self.cache.invalidate_all();
        Ok(())
    }

    pub async fn set_guardrails(&self, id: Uuid, config: GuardrailConfig) -> DomainResult<()> {
        config.validate()?;
        let mut experiment = self.get(id).await?;
        experiment.guardrail_config = config;
        experiment.updated_at = Utc::now();
        self.experiments.update(&experiment).await?;
        self.cache.invalidate_all();
        Ok(())
    }

    pub async fn set_decision_criteria(
        &self,
        id: Uuid,
        config: DecisionConfig,
    ) -> DomainResult<()> {
        config.validate()?;
        let mut experiment = self.get(id).await?;
        experiment.decision_config = config;
        experiment.updated_at = Utc::now();
        self.experiments.update(&experiment).await?;
        self.cache.invalidate_all();
        Ok(())
    }

    pub async fn list_all(&self) -> DomainResult<Vec<Experiment>> {
        self.experiments.list(None).await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Experiment> {
        self.experiments
            .get(id)
            .await?
            .ok_or(DomainError::ExperimentNotFound(id))
    }

    async fn status_of(&self, id: Uuid) -> DomainResult<ExperimentStatus> {
        Ok(self.get(id).await?.status)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
    ) -> DomainResult<()> {
        let moved = self.experiments.transition(id, from, to).await?;
        if !moved {
            let actual = self.status_of(id).await?;
            return Err(DomainError::InvalidStateTransition {
                from: actual.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.cache.invalidate_all();
        tracing::info!(experiment_id = %id, from = from.as_str(), to = to.as_str(), "experiment transitioned");
        Ok(())
    }

    /// Seed one state row per (policy, arm) with the policy's priors.
    /// Context-keyed rows appear lazily as contexts are observed.
    async fn seed_priors(&self, id: Uuid) -> DomainResult<()> {
        let experiment = self.get(id).await?;
        let catalog = self
            .catalogs
            .get(id, experiment.catalog_version)
            .await?
            .ok_or(DomainError::UnavailableArmCatalog(id))?;
        let policies = self.policies.list_for_experiment(id).await?;

        let mut rows = Vec::with_capacity(policies.len() * catalog.arms.len());
        for policy in &policies {
            let (alpha0, beta0) = match &policy.params {
                PolicyParams::Thompson { alpha0, beta0, .. } => (*alpha0, *beta0),
                _ => (1.0, 1.0),
            };
            for arm in &catalog.arms {
                rows.push(ArmState::seeded(
                    StateKey::new(id, policy.id.clone(), arm.arm_id.clone(), ""),
                    alpha0,
                    beta0,
                ));
            }
        }
        self.state.seed(&rows).await?;
        tracing::debug!(experiment_id = %id, rows = rows.len(), "priors seeded");
        Ok(())
    }
}
