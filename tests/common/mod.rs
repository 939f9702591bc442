//! Shared test harness: in-memory database and wired services.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use levers::adapters::sqlite::{
    Database, SqliteAssignmentRepository, SqliteCatalogRepository, SqliteDecisionRepository,
    SqliteEventRepository, SqliteExperimentRepository, SqliteGuardrailRepository,
    SqlitePolicyRepository, SqliteReplayRepository, SqliteRewardQueue, SqliteStateRepository,
};
use levers::domain::models::{
    Arm, ArmCatalog, AttributionConfig, DecisionRunnerConfig, Experiment, MonitorConfig,
    PolicyConfig, PolicyParams, ServeConfig, TrafficPlan,
};
use levers::domain::ports::{
    AssignmentRepository, CatalogRepository, DecisionRepository, EventRepository,
    ExperimentRepository, GuardrailRepository, PolicyRepository, ReplayRepository, RewardQueue,
    StateRepository,
};
use levers::services::{
    AnalyticsService, AssignmentRouter, ConfigCache, DecisionEngine, ExperimentService,
    GuardrailMonitor, ReplayService, RewardAttributor, ServePipeline, StateUpdater,
};

pub struct TestContext {
    pub experiments: Arc<dyn ExperimentRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub catalogs: Arc<dyn CatalogRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub state: Arc<dyn StateRepository>,
    pub events: Arc<dyn EventRepository>,
    pub guardrails: Arc<dyn GuardrailRepository>,
    pub decisions_repo: Arc<dyn DecisionRepository>,
    pub queue: Arc<dyn RewardQueue>,
    pub replay_repo: Arc<dyn ReplayRepository>,
    pub cache: Arc<ConfigCache>,
    pub lifecycle: Arc<ExperimentService>,
    pub pipeline: ServePipeline,
    pub attributor: RewardAttributor,
    pub updater: StateUpdater,
    pub monitor: GuardrailMonitor,
    pub decision_engine: DecisionEngine,
    pub analytics: AnalyticsService,
    pub replay: ReplayService,
}

pub async fn setup() -> TestContext {
    let db = Database::open_in_memory().await.expect("in-memory store");
    let pool = db.pool().clone();

    let experiments: Arc<dyn ExperimentRepository> =
        Arc::new(SqliteExperimentRepository::new(pool.clone()));
    let policies: Arc<dyn PolicyRepository> = Arc::new(SqlitePolicyRepository::new(pool.clone()));
    let catalogs: Arc<dyn CatalogRepository> = Arc::new(SqliteCatalogRepository::new(pool.clone()));
    let assignments: Arc<dyn AssignmentRepository> =
        Arc::new(SqliteAssignmentRepository::new(pool.clone()));
    let state: Arc<dyn StateRepository> = Arc::new(SqliteStateRepository::new(pool.clone()));
    let events: Arc<dyn EventRepository> = Arc::new(SqliteEventRepository::new(pool.clone()));
    let guardrails: Arc<dyn GuardrailRepository> =
        Arc::new(SqliteGuardrailRepository::new(pool.clone()));
    let decisions_repo: Arc<dyn DecisionRepository> =
        Arc::new(SqliteDecisionRepository::new(pool.clone()));
    let queue: Arc<dyn RewardQueue> = Arc::new(SqliteRewardQueue::new(pool.clone()));
    let replay_repo: Arc<dyn ReplayRepository> = Arc::new(SqliteReplayRepository::new(pool));

    let cache = Arc::new(ConfigCache::new(Duration::from_millis(50)));
    let lifecycle = Arc::new(ExperimentService::new(
        experiments.clone(),
        policies.clone(),
        catalogs.clone(),
        state.clone(),
        assignments.clone(),
        decisions_repo.clone(),
        cache.clone(),
    ));
    let pipeline = ServePipeline::new(
        experiments.clone(),
        policies.clone(),
        catalogs.clone(),
        state.clone(),
        events.clone(),
        AssignmentRouter::new(assignments.clone()),
        cache.clone(),
        ServeConfig {
            policy_deadline_ms: 5_000,
            total_deadline_ms: 10_000,
            ..Default::default()
        },
    );
    let attributor = RewardAttributor::new(
        experiments.clone(),
        events.clone(),
        queue.clone(),
        AttributionConfig::default(),
    );
    let updater = StateUpdater::new(
        policies.clone(),
        state.clone(),
        queue.clone(),
        AttributionConfig::default(),
    );
    let monitor = GuardrailMonitor::new(
        experiments.clone(),
        events.clone(),
        guardrails.clone(),
        lifecycle.clone(),
        MonitorConfig::default(),
    );
    let decision_engine = DecisionEngine::new(
        experiments.clone(),
        policies.clone(),
        catalogs.clone(),
        state.clone(),
        events.clone(),
        decisions_repo.clone(),
        lifecycle.clone(),
        DecisionRunnerConfig::default(),
    );
    let analytics = AnalyticsService::new(
        experiments.clone(),
        events.clone(),
        assignments.clone(),
        state.clone(),
        guardrails.clone(),
        decisions_repo.clone(),
    );
    let replay = ReplayService::new(replay_repo.clone());

    TestContext {
        experiments,
        policies,
        catalogs,
        assignments,
        state,
        events,
        guardrails,
        decisions_repo,
        queue,
        replay_repo,
        cache,
        lifecycle,
        pipeline,
        attributor,
        updater,
        monitor,
        decision_engine,
        analytics,
        replay,
    }
}

/// A two-policy (control + thompson) experiment over two arms.
pub fn two_arm_experiment(salt: &str, traffic_fraction: f64) -> (Experiment, Vec<PolicyConfig>, ArmCatalog) {
    let plan = TrafficPlan::new(vec![
        ("control".to_string(), 0.5),
        ("treatment".to_string(), 0.5),
    ]);
    let experiment = Experiment::new("e2e", "home", salt, traffic_fraction, plan, "control");
    let experiment_id = experiment.id;

    let policies = vec![
        PolicyConfig::new(
            "control",
            experiment_id,
            PolicyParams::Control { arm_id: Some("base".to_string()) },
        ),
        PolicyConfig::new(
            "treatment",
            experiment_id,
            PolicyParams::Thompson {
                alpha0: 1.0,
                beta0: 1.0,
                mc_draws: 500,
                contextual: false,
            },
        ),
    ];
    let catalog = ArmCatalog::new(
        experiment_id,
        1,
        vec![Arm::new("base", experiment_id), Arm::new("new", experiment_id)],
    );
    (experiment, policies, catalog)
}

/// Create and start the standard experiment, returning its id.
pub async fn start_two_arm(ctx: &TestContext, salt: &str, traffic_fraction: f64) -> Uuid {
    let (experiment, policies, catalog) = two_arm_experiment(salt, traffic_fraction);
    let id = ctx
        .lifecycle
        .create(experiment, policies, catalog)
        .await
        .expect("create experiment");
    ctx.lifecycle.start(id).await.expect("start experiment");
    id
}
