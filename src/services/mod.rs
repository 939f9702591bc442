//! Application services for the Levers experimentation runtime.

pub mod analytics;
pub mod assignment_router;
pub mod decision_engine;
pub mod experiment_service;
pub mod guardrail_monitor;
pub mod replay;
pub mod reward_attributor;
pub mod serve_pipeline;
pub mod state_cache;
pub mod state_updater;
pub mod stats;

pub use analytics::{
    AnalyticsService, ArmSummary, CohortRow, ExperimentSummary, ExportFormat, Granularity,
    Metric, TimeseriesPoint,
};
pub use assignment_router::{bucket_of, route, AssignmentRouter};
pub use decision_engine::DecisionEngine;
pub use experiment_service::ExperimentService;
pub use guardrail_monitor::GuardrailMonitor;
pub use replay::{ReplayReport, ReplayService, ReplayWindow};
pub use reward_attributor::{compose_reward, IngestOutcome, RewardAttributor};
pub use serve_pipeline::{RecommendedItem, ServeCounters, ServePipeline};
pub use state_cache::ConfigCache;
pub use state_updater::StateUpdater;
