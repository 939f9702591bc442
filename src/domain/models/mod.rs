//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod arm;
pub mod arm_state;
pub mod assignment;
pub mod config;
pub mod context;
pub mod decision;
pub mod event;
pub mod experiment;
pub mod guardrail;
pub mod policy;
pub mod replay;

pub use arm::{Arm, ArmCatalog};
pub use arm_state::{ArmState, StateKey};
pub use assignment::{Assignment, AssignmentOutcome};
pub use config::{
    AttributionConfig, Config, DatabaseConfig, DecisionRunnerConfig, LoggingConfig,
    MonitorConfig, ServeConfig,
};
pub use context::{context_key, Context};
pub use decision::{Decision, DecisionConfig, PolicyEstimate, Verdict};
pub use event::{
    RewardEvent, RewardKind, ServeEvent, SERVE_EVENT_SCHEMA_VERSION,
};
pub use experiment::{
    Experiment, ExperimentStatus, RewardMapping, TrafficPlan, TrafficShare,
};
pub use guardrail::{
    GuardrailAction, GuardrailCheck, GuardrailConfig, GuardrailName, GuardrailStatus,
};
pub use policy::{PolicyConfig, PolicyKind, PolicyParams};
pub use replay::LoggedEvent;
