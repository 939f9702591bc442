//! Domain errors for the Levers experimentation runtime.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Levers system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(Uuid),

    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Serve event not found: {0}")]
    EventNotFound(Uuid),

    #[error("No active experiment for surface {0}")]
    NoActiveExperiment(String),

    #[error("Unknown policy kind: {0}")]
    UnknownPolicy(String),

    #[error("No eligible arm in candidate set")]
    NoEligibleArm,

    #[error("Arm catalog unavailable for experiment {0}")]
    UnavailableArmCatalog(Uuid),

    #[error("Invalid policy state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Attribution window closed for event {0}")]
    AttributionClosed(Uuid),

    #[error("Reward value {value} out of range for kind {kind}")]
    RewardOutOfRange { kind: String, value: f64 },

    #[error("Unknown reward kind: {0}")]
    UnknownRewardKind(String),

    #[error("Policy selection exceeded deadline")]
    PolicyTimeout,

    #[error("State conflict on {key} after {attempts} attempts")]
    StateConflict { key: String, attempts: u32 },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Transient errors are retried with backoff; everything else fails the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
