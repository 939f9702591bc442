//! Serve pipeline: experiment lookup, assignment, selection, event logging.
//!
//! The hot path. Reads go through bounded-stale caches, policy selection
//! runs under a hard deadline with a control fallback, and a serve event is
//! emitted for every returned item even when logging degrades.

use chrono::Utc;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    context_key, ArmCatalog, AssignmentOutcome, Context, Experiment, PolicyConfig, PolicyParams,
    ServeConfig, ServeEvent,
};
use crate::domain::policy::{build_policy, BanditPolicy, ControlPolicy, Selection, StateView};
use crate::domain::ports::{
    CatalogRepository, EventRepository, ExperimentRepository, PolicyRepository, StateRepository,
};
use crate::services::assignment_router::AssignmentRouter;
use crate::services::state_cache::ConfigCache;

/// One recommended item returned to the host recommender.
#[derive(Debug, Clone)]
pub struct RecommendedItem {
    pub arm_id: String,
    pub position: i32,
    pub propensity: f64,
    pub score: f64,
    pub experiment_id: Uuid,
    pub policy_id: String,
    pub event_id: Uuid,
}

/// Operational counters sampled by logging and ops tooling. The guardrail
/// monitor works from event rows; these are cheap process-local signals.
#[derive(Debug, Default)]
pub struct ServeCounters {
    pub serves: AtomicU64,
    pub errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub dropped_events: AtomicU64,
}

impl ServeCounters {
    pub fn record_serve(&self) {
        self.serves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// The serve pipeline service.
pub struct ServePipeline {
    experiments: Arc<dyn ExperimentRepository>,
    policies: Arc<dyn PolicyRepository>,
    catalogs: Arc<dyn CatalogRepository>,
    state: Arc<dyn StateRepository>,
    events: Arc<dyn EventRepository>,
    router: AssignmentRouter,
    cache: Arc<ConfigCache>,
    config: ServeConfig,
    pub counters: Arc<ServeCounters>,
}

impl ServePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        policies: Arc<dyn PolicyRepository>,
        catalogs: Arc<dyn CatalogRepository>,
        state: Arc<dyn StateRepository>,
        events: Arc<dyn EventRepository>,
        router: AssignmentRouter,
        cache: Arc<ConfigCache>,
        config: ServeConfig,
    ) -> Self {
        Self {
            experiments,
            policies,
            catalogs,
            state,
            events,
            router,
            cache,
            config,
            counters: Arc::new(ServeCounters::default()),
        }
    }

    /// Serve `k` ranked arms for a request.
    pub async fn recommend(
        &self,
        user_id: &str,
        surface: &str,
        context: &Context,
        k: usize,
    ) -> DomainResult<Vec<RecommendedItem>> {
        self.recommend_seeded(user_id, surface, context, k, rand::random()).await
    }

    /// `recommend` with an explicit selection seed, for tests and replay.
    pub async fn recommend_seeded(
        &self,
        user_id: &str,
        surface: &str,
        context: &Context,
        k: usize,
        seed: u64,
    ) -> DomainResult<Vec<RecommendedItem>> {
        let started = Instant::now();
        self.counters.record_serve();

        // 1-3. Experiment lookup, assignment, and catalog/config reads run
        // under the end-to-end deadline; selection has its own below.
        let total_deadline = Duration::from_millis(self.config.total_deadline_ms);
        let (experiment, policy_id, catalog) =
            match tokio::time::timeout(total_deadline, self.load_serve_inputs(user_id, surface))
                .await
            {
                Ok(loaded) => loaded?,
                Err(_) => {
                    self.counters.record_timeout();
                    return Err(DomainError::PolicyTimeout);
                }
            };
        let experiment = &experiment;

        let now = Utc::now();
        let arm_ids: Vec<String> = catalog
            .eligible_at(now)
            .into_iter()
            .map(|a| a.arm_id.clone())
            .collect();
        if arm_ids.is_empty() {
            self.counters.record_error();
            return Err(DomainError::NoEligibleArm);
        }

        let policy_config = self
            .cache
            .policy(self.policies.as_ref(), experiment.id, &policy_id)
            .await?
            .ok_or_else(|| DomainError::PolicyNotFound(policy_id.clone()))?;

        let ctx_key = if policy_config.params.is_contextual() {
            context_key(context, &experiment.recognized_context_keys)
        } else {
            String::new()
        };

        // 4-5. State load plus selection under the policy deadline, control
        // fallback on timeout or policy error.
        let k = k.min(arm_ids.len()).max(1);
        let mut rng = SmallRng::seed_from_u64(seed);
        let deadline = Duration::from_millis(self.config.policy_deadline_ms);
        let select_result = tokio::time::timeout(
            deadline,
            self.select_ranked(experiment, &policy_config, &arm_ids, &ctx_key, k, &mut rng),
        )
        .await;

        let (selections, timed_out, error) = match select_result {
            Ok(Ok(selections)) => (selections, false, None),
            Ok(Err(e)) => {
                self.counters.record_error();
                tracing::error!(
                    experiment_id = %experiment.id,
                    policy_id = %policy_id,
                    error = %e,
                    "policy selection failed; serving control"
                );
                (control_ranked(&arm_ids, k)?, false, Some(e.to_string()))
            }
            Err(_) => {
                self.counters.record_timeout();
                tracing::warn!(
                    experiment_id = %experiment.id,
                    policy_id = %policy_id,
                    "policy selection exceeded deadline; serving control"
                );
                (control_ranked(&arm_ids, k)?, true, None)
            }
        };

        // 6. Append one event per position; logging failures degrade to a
        // dropped marker, never to a failed serve.
        let latency_ms = started.elapsed().as_millis() as i64;
        let mut items = Vec::with_capacity(selections.len());
        for (position, selection) in selections.into_iter().enumerate() {
            let mut event = ServeEvent::new(
                experiment.id,
                user_id,
                &policy_id,
                &selection.arm_id,
                position as i32,
                context.clone(),
                &ctx_key,
                selection.propensity,
                selection.score,
                latency_ms,
            );
            event.policy_timeout = timed_out;
            event.error = error.clone();

            if let Err(e) = self.events.append_serve(&event).await {
                self.counters.record_dropped();
                tracing::error!(event_id = %event.event_id, error = %e, "serve event dropped");
            }

            items.push(RecommendedItem {
                arm_id: selection.arm_id,
                position: position as i32,
                propensity: selection.propensity,
                score: selection.score,
                experiment_id: experiment.id,
                policy_id: policy_id.clone(),
                event_id: event.event_id,
            });
        }
        Ok(items)
    }

    /// Governing experiment, assigned policy, and pinned catalog for one
    /// request. Users without a persisted identity bypass the experiment
    /// and get the default policy.
    async fn load_serve_inputs(
        &self,
        user_id: &str,
        surface: &str,
    ) -> DomainResult<(Experiment, String, Arc<ArmCatalog>)> {
        let active = self
            .cache
            .active_for_surface(self.experiments.as_ref(), surface)
            .await?;
        let experiment = active
            .first()
            .ok_or_else(|| DomainError::NoActiveExperiment(surface.to_string()))?;

        let policy_id = if user_id.is_empty() {
            experiment.default_policy_id.clone()
        } else {
            match self.router.assign(experiment, user_id).await? {
                AssignmentOutcome::Assigned { policy_id, .. } => policy_id,
                AssignmentOutcome::OutOfExperiment { .. } => {
                    experiment.default_policy_id.clone()
                }
            }
        };

        let catalog = self
            .cache
            .catalog(self.catalogs.as_ref(), experiment.id, experiment.catalog_version)
            .await?
            .ok_or(DomainError::UnavailableArmCatalog(experiment.id))?;
        Ok((experiment.clone(), policy_id, catalog))
    }

    /// Select `k` arms without replacement, each with its propensity over
    /// the remaining candidate set.
    async fn select_ranked(
        &self,
        experiment: &Experiment,
        policy_config: &PolicyConfig,
        arm_ids: &[String],
        ctx_key: &str,
        k: usize,
        rng: &mut SmallRng,
    ) -> DomainResult<Vec<Selection>> {
        let policy = build_policy(&policy_config.params)?;
        let slice = self
            .cache
            .state_slice(self.state.as_ref(), experiment.id, &policy_config.id, ctx_key)
            .await?;
        let mut view = StateView::new(slice.iter().cloned());
        if let PolicyParams::Thompson { alpha0, beta0, .. } = &policy_config.params {
            view.seed_missing(experiment.id, &policy_config.id, ctx_key, arm_ids, *alpha0, *beta0);
        }

        let mut remaining: Vec<String> = arm_ids.to_vec();
        let mut selections = Vec::with_capacity(k);
        for _ in 0..k {
            if remaining.is_empty() {
                break;
            }
            let selection = policy.select(&remaining, &view, rng)?;
            remaining.retain(|a| a != &selection.arm_id);
            selections.push(selection);
        }
        Ok(selections)
    }
}

/// Control fallback ranking: catalog order, unit propensity at the head.
fn control_ranked(arm_ids: &[String], k: usize) -> DomainResult<Vec<Selection>> {
    let control = ControlPolicy::new(None);
    let mut rng = SmallRng::seed_from_u64(0);
    let mut remaining: Vec<String> = arm_ids.to_vec();
    let mut selections = Vec::with_capacity(k);
    for _ in 0..k.min(arm_ids.len()) {
        if remaining.is_empty() {
            break;
        }
        let selection = control.select(&remaining, &StateView::default(), &mut rng)?;
        remaining.retain(|a| a != &selection.arm_id);
        selections.push(selection);
    }
    Ok(selections)
}
