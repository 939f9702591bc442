//! Levers CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use levers::adapters::sqlite::{
    Database, SqliteAssignmentRepository, SqliteCatalogRepository, SqliteDecisionRepository,
    SqliteEventRepository, SqliteExperimentRepository, SqliteGuardrailRepository,
    SqlitePolicyRepository, SqliteReplayRepository, SqliteRewardQueue, SqliteStateRepository,
};
use levers::cli::{commands, Cli, Commands, ExperimentCommands, ReplayCommands};
use levers::domain::models::Config;
use levers::infrastructure::config::ConfigLoader;
use levers::infrastructure::logging::init_logging;
use levers::services::{
    AnalyticsService, ConfigCache, DecisionEngine, ExperimentService, GuardrailMonitor,
    ReplayService, RewardAttributor, StateUpdater,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _log_guard = init_logging(&config.logging).context("failed to initialize logging")?;

    let db = Database::open(&config.database.path, config.database.max_connections)
        .await
        .context("failed to open database")?;
    db.ping().await.context("database did not answer startup probe")?;

    let services = Services::build(&config, db.pool().clone());

    match cli.command {
        Commands::Experiment(cmd) => handle_experiment(&services, cmd).await,
        Commands::Replay(cmd) => handle_replay(&services, cmd).await,
        Commands::Run => run_workers(&services).await,
    }
}

/// Wired application services over one database pool.
struct Services {
    lifecycle: Arc<ExperimentService>,
    analytics: AnalyticsService,
    replay: ReplayService,
    attributor: Arc<RewardAttributor>,
    updater: Arc<StateUpdater>,
    monitor: Arc<GuardrailMonitor>,
    decisions: Arc<DecisionEngine>,
}

impl Services {
    fn build(config: &Config, pool: sqlx::SqlitePool) -> Self {
        let experiments = Arc::new(SqliteExperimentRepository::new(pool.clone()));
        let policies = Arc::new(SqlitePolicyRepository::new(pool.clone()));
        let catalogs = Arc::new(SqliteCatalogRepository::new(pool.clone()));
        let assignments = Arc::new(SqliteAssignmentRepository::new(pool.clone()));
        let state = Arc::new(SqliteStateRepository::new(pool.clone()));
        let events = Arc::new(SqliteEventRepository::new(pool.clone()));
        let guardrails = Arc::new(SqliteGuardrailRepository::new(pool.clone()));
        let decisions_repo = Arc::new(SqliteDecisionRepository::new(pool.clone()));
        let queue = Arc::new(SqliteRewardQueue::new(pool.clone()));
        let replay_repo = Arc::new(SqliteReplayRepository::new(pool));

        let cache = Arc::new(ConfigCache::new(Duration::from_secs(
            config.serve.cache_ttl_secs,
        )));

        let lifecycle = Arc::new(ExperimentService::new(
            experiments.clone(),
            policies.clone(),
            catalogs.clone(),
            state.clone(),
            assignments.clone(),
            decisions_repo.clone(),
            cache.clone(),
        ));
        let analytics = AnalyticsService::new(
            experiments.clone(),
            events.clone(),
            assignments.clone(),
            state.clone(),
            guardrails.clone(),
            decisions_repo.clone(),
        );
        let replay = ReplayService::new(replay_repo);
        let attributor = Arc::new(RewardAttributor::new(
            experiments.clone(),
            events.clone(),
            queue.clone(),
            config.attribution.clone(),
        ));
        let updater = Arc::new(StateUpdater::new(
            policies.clone(),
            state.clone(),
            queue,
            config.attribution.clone(),
        ));
        let monitor = Arc::new(GuardrailMonitor::new(
            experiments.clone(),
            events.clone(),
            guardrails,
            lifecycle.clone(),
            config.monitor.clone(),
        ));
        let decisions = Arc::new(DecisionEngine::new(
            experiments,
            policies,
            catalogs,
            state,
            events,
            decisions_repo,
            lifecycle.clone(),
            config.decision.clone(),
        ));

        Self { lifecycle, analytics, replay, attributor, updater, monitor, decisions }
    }
}

async fn handle_experiment(services: &Services, cmd: ExperimentCommands) -> Result<()> {
    match cmd {
        ExperimentCommands::Create { spec } => {
            commands::experiment::handle_create(&services.lifecycle, &spec).await
        }
        ExperimentCommands::Start { id } => Ok(services.lifecycle.start(id).await?),
        ExperimentCommands::Pause { id } => Ok(services.lifecycle.pause(id).await?),
        ExperimentCommands::Resume { id } => Ok(services.lifecycle.resume(id).await?),
        ExperimentCommands::End { id } => Ok(services.lifecycle.end(id).await?),
        ExperimentCommands::Kill { id, reason } => {
            Ok(services.lifecycle.kill(id, &reason).await?)
        }
        ExperimentCommands::Ramp { id, fraction } => {
            Ok(services.lifecycle.ramp(id, fraction).await?)
        }
        ExperimentCommands::SetSalt { id, salt } => {
            Ok(services.lifecycle.set_salt(id, &salt).await?)
        }
        ExperimentCommands::List => {
            commands::experiment::handle_list(&services.lifecycle).await
        }
        ExperimentCommands::Summary { id } => {
            commands::experiment::handle_summary(&services.analytics, id).await
        }
        ExperimentCommands::Guardrails { id } => {
            commands::experiment::handle_guardrails(&services.analytics, id).await
        }
        ExperimentCommands::Export { id, format } => {
            commands::experiment::handle_export(&services.analytics, id, &format).await
        }
    }
}

async fn handle_replay(services: &Services, cmd: ReplayCommands) -> Result<()> {
    match cmd {
        ReplayCommands::LoadLogs { path } => {
            commands::replay::handle_load_logs(&services.replay, &path).await
        }
        ReplayCommands::SelectWindow { min_days } => {
            commands::replay::handle_select_window(&services.replay, min_days).await
        }
        ReplayCommands::Run { policy, label, min_days, seed } => {
            commands::replay::handle_replay(&services.replay, &policy, &label, min_days, seed)
                .await
        }
    }
}

/// Run the background workers until interrupted.
async fn run_workers(services: &Services) -> Result<()> {
    tracing::info!("starting background workers");
    let attributor = services.attributor.clone();
    let updater = services.updater.clone();
    let monitor = services.monitor.clone();
    let decisions = services.decisions.clone();

    tokio::select! {
        () = attributor.run() => {}
        () = updater.run() => {}
        () = monitor.run() => {}
        () = decisions.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
