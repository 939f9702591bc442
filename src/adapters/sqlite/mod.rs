//! SQLite adapters for the domain ports.

pub mod assignment_repository;
pub mod catalog_repository;
pub mod database;
pub mod decision_repository;
pub mod event_repository;
pub mod experiment_repository;
pub mod guardrail_repository;
pub mod policy_repository;
pub mod replay_repository;
pub mod reward_queue;
pub mod state_repository;

pub use assignment_repository::SqliteAssignmentRepository;
pub use catalog_repository::SqliteCatalogRepository;
pub use database::{Database, StorageError};
pub use decision_repository::SqliteDecisionRepository;
pub use event_repository::SqliteEventRepository;
pub use experiment_repository::SqliteExperimentRepository;
pub use guardrail_repository::SqliteGuardrailRepository;
pub use policy_repository::SqlitePolicyRepository;
pub use replay_repository::SqliteReplayRepository;
pub use reward_queue::SqliteRewardQueue;
pub use state_repository::SqliteStateRepository;
