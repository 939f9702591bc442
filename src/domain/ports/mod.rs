//! Ports (interfaces) for the domain layer.
//!
//! Repository and queue traits the application services depend on.
//! Implementations live in the adapters layer.

pub mod assignment_repository;
pub mod catalog_repository;
pub mod decision_repository;
pub mod event_repository;
pub mod experiment_repository;
pub mod guardrail_repository;
pub mod policy_repository;
pub mod replay_repository;
pub mod reward_queue;
pub mod state_repository;

pub use assignment_repository::AssignmentRepository;
pub use catalog_repository::CatalogRepository;
pub use decision_repository::DecisionRepository;
pub use event_repository::{EventFilter, EventRepository, PolicyServeStats};
pub use experiment_repository::ExperimentRepository;
pub use guardrail_repository::GuardrailRepository;
pub use policy_repository::PolicyRepository;
pub use replay_repository::ReplayRepository;
pub use reward_queue::{QueuedUpdate, RewardQueue, RewardUpdate};
pub use state_repository::StateRepository;
