//! SQLite implementation of the StateRepository.
//!
//! One row per (experiment, policy, arm, context) key. Writes are
//! compare-and-swap on the row version; counters never decrease because the
//! only writer path folds rewards forward and retries on conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ArmState, StateKey};
use crate::domain::ports::StateRepository;

#[derive(Clone)]
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct StateRow {
    experiment_id: String,
    policy_id: String,
    arm_id: String,
    context_key: String,
    pulls: i64,
    successes: f64,
    failures: f64,
    sum_reward: f64,
    sum_reward_sq: f64,
    alpha: f64,
    beta: f64,
    version: i64,
    updated_at: String,
}

impl TryFrom<StateRow> for ArmState {
    type Error = DomainError;

    fn try_from(row: StateRow) -> DomainResult<Self> {
        Ok(ArmState {
            key: StateKey {
                experiment_id: Uuid::parse_str(&row.experiment_id)
                    .map_err(|e| DomainError::SerializationError(e.to_string()))?,
                policy_id: row.policy_id,
                arm_id: row.arm_id,
                context_key: row.context_key,
            },
            pulls: row.pulls,
            successes: row.successes,
            failures: row.failures,
            sum_reward: row.sum_reward,
            sum_reward_sq: row.sum_reward_sq,
            alpha: row.alpha,
            beta: row.beta,
            version: row.version,
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
        })
    }
}

#[async_trait]
impl StateRepository for SqliteStateRepository {
    async fn seed(&self, states: &[ArmState]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        for state in states {
            sqlx::query(
                r#"INSERT OR IGNORE INTO policy_arm_state
                   (experiment_id, policy_id, arm_id, context_key, pulls, successes,
                    failures, sum_reward, sum_reward_sq, alpha, beta, version, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(state.key.experiment_id.to_string())
            .bind(&state.key.policy_id)
            .bind(&state.key.arm_id)
            .bind(&state.key.context_key)
            .bind(state.pulls)
            .bind(state.successes)
            .bind(state.failures)
            .bind(state.sum_reward)
            .bind(state.sum_reward_sq)
            .bind(state.alpha)
            .bind(state.beta)
            .bind(state.version)
            .bind(state.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, key: &StateKey) -> DomainResult<Option<ArmState>> {
        let row: Option<StateRow> = sqlx::query_as(
            r#"SELECT * FROM policy_arm_state
               WHERE experiment_id = ? AND policy_id = ? AND arm_id = ? AND context_key = ?"#,
        )
        .bind(key.experiment_id.to_string())
        .bind(&key.policy_id)
        .bind(&key.arm_id)
        .bind(&key.context_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ArmState::try_from).transpose()
    }

    async fn load_slice(
        &self,
        experiment_id: Uuid,
        policy_id: &str,
        context_key: &str,
    ) -> DomainResult<Vec<ArmState>> {
        let rows: Vec<StateRow> = sqlx::query_as(
            r#"SELECT * FROM policy_arm_state
               WHERE experiment_id = ? AND policy_id = ? AND context_key = ?
               ORDER BY arm_id"#,
        )
        .bind(experiment_id.to_string())
        .bind(policy_id)
        .bind(context_key)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ArmState::try_from).collect()
    }

    async fn load_for_experiment(&self, experiment_id: Uuid) -> DomainResult<Vec<ArmState>> {
        let rows: Vec<StateRow> = sqlx::query_as(
            r#"SELECT * FROM policy_arm_state WHERE experiment_id = ?
               ORDER BY policy_id, arm_id, context_key"#,
        )
        .bind(experiment_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ArmState::try_from).collect()
    }

    async fn compare_and_update(
        &self,
        state: &ArmState,
        expected_version: i64,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE policy_arm_state SET pulls = ?, successes = ?, failures = ?,
               sum_reward = ?, sum_reward_sq = ?, alpha = ?, beta = ?,
               version = ?, updated_at = ?
               WHERE experiment_id = ? AND policy_id = ? AND arm_id = ?
                 AND context_key = ? AND version = ?"#,
        )
        .bind(state.pulls)
        .bind(state.successes)
        .bind(state.failures)
        .bind(state.sum_reward)
        .bind(state.sum_reward_sq)
        .bind(state.alpha)
        .bind(state.beta)
        .bind(state.version)
        .bind(state.updated_at.to_rfc3339())
        .bind(state.key.experiment_id.to_string())
        .bind(&state.key.policy_id)
        .bind(&state.key.arm_id)
        .bind(&state.key.context_key)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
