//! Serve and reward event models.
//!
//! Serve events are append-only; the reward fields are written at most once
//! within the attribution window, guarded by `attribution_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::context::Context;

/// Bumped whenever a field is added to the serve event row.
pub const SERVE_EVENT_SCHEMA_VERSION: i32 = 1;

/// One logged serve: the arm a policy returned for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeEvent {
    pub event_id: Uuid,
    pub experiment_id: Uuid,
    pub user_id: String,
    pub policy_id: String,
    pub arm_id: String,
    /// Slot in the ranked list, zero-based.
    pub position: i32,
    pub context: Context,
    /// Context key the state row was selected under.
    pub context_key: String,
    /// Probability the policy would have emitted this arm at serve time.
    pub propensity: f64,
    pub score: f64,
    pub latency_ms: i64,
    pub served_at: DateTime<Utc>,
    pub reward: Option<f64>,
    pub reward_at: Option<DateTime<Utc>>,
    /// CAS guard for reward writes; 0 until attribution runs.
    pub attribution_version: i32,
    /// The policy call missed its deadline and control was served instead.
    pub policy_timeout: bool,
    /// Event row was accepted by the best-effort queue after a write failure.
    pub dropped: bool,
    pub error: Option<String>,
    pub schema_version: i32,
}

impl ServeEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        experiment_id: Uuid,
        user_id: impl Into<String>,
        policy_id: impl Into<String>,
        arm_id: impl Into<String>,
        position: i32,
        context: Context,
        context_key: impl Into<String>,
        propensity: f64,
        score: f64,
        latency_ms: i64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            experiment_id,
            user_id: user_id.into(),
            policy_id: policy_id.into(),
            arm_id: arm_id.into(),
            position,
            context,
            context_key: context_key.into(),
            propensity,
            score,
            latency_ms,
            served_at: Utc::now(),
            reward: None,
            reward_at: None,
            attribution_version: 0,
            policy_timeout: false,
            dropped: false,
            error: None,
            schema_version: SERVE_EVENT_SCHEMA_VERSION,
        }
    }

    /// Instant after which reward writes are rejected.
    pub fn window_closes_at(&self, window: chrono::Duration) -> DateTime<Utc> {
        self.served_at + window
    }

    pub fn is_attributed(&self) -> bool {
        self.reward.is_some()
    }
}

/// Kind of downstream user signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Click,
    Rating,
    ThumbsUp,
    ThumbsDown,
    Custom,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Rating => "rating",
            Self::ThumbsUp => "thumbs_up",
            Self::ThumbsDown => "thumbs_down",
            Self::Custom => "custom",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "click" => Some(Self::Click),
            "rating" => Some(Self::Rating),
            "thumbs_up" => Some(Self::ThumbsUp),
            "thumbs_down" => Some(Self::ThumbsDown),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Conflict-resolution priority: custom > rating > thumbs > click.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Custom => 4,
            Self::Rating => 3,
            Self::ThumbsUp | Self::ThumbsDown => 2,
            Self::Click => 1,
        }
    }

    /// Reject values outside the per-kind range at ingestion time.
    pub fn validate_value(&self, value: f64) -> DomainResult<()> {
        if !value.is_finite() {
            return Err(DomainError::RewardOutOfRange {
                kind: self.as_str().to_string(),
                value,
            });
        }
        let ok = match self {
            Self::Click => value == 0.0 || value == 1.0,
            Self::Rating => (1.0..=5.0).contains(&value),
            // Thumbs carry their sign in the kind; the value is ignored.
            Self::ThumbsUp | Self::ThumbsDown => true,
            Self::Custom => true,
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::RewardOutOfRange {
                kind: self.as_str().to_string(),
                value,
            })
        }
    }

    /// Map a raw signal value to a reward.
    pub fn map_value(&self, value: f64) -> f64 {
        match self {
            Self::Click => {
                if value > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Rating => ((value - 2.5) / 2.5).clamp(-1.0, 1.0),
            Self::ThumbsUp => 1.0,
            Self::ThumbsDown => 0.0,
            Self::Custom => value,
        }
    }
}

/// A downstream user signal attached to a serve event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEvent {
    pub event_id: Uuid,
    pub kind: RewardKind,
    pub value: f64,
    pub at: DateTime<Utc>,
}

impl RewardEvent {
    pub fn new(event_id: Uuid, kind: RewardKind, value: f64, at: DateTime<Utc>) -> Self {
        Self { event_id, kind, value, at }
    }
}
