//! SQLite implementation of the GuardrailRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    GuardrailAction, GuardrailCheck, GuardrailName, GuardrailStatus,
};
use crate::domain::ports::GuardrailRepository;

#[derive(Clone)]
pub struct SqliteGuardrailRepository {
    pool: SqlitePool,
}

impl SqliteGuardrailRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type CheckRow = (String, String, String, f64, f64, String, String);

fn row_to_check(row: CheckRow) -> DomainResult<GuardrailCheck> {
    let (experiment_id, at, name, value, threshold, status, action) = row;
    Ok(GuardrailCheck {
        experiment_id: Uuid::parse_str(&experiment_id)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?,
        at: DateTime::parse_from_rfc3339(&at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| DomainError::SerializationError(e.to_string()))?,
        name: GuardrailName::from_str(&name)
            .ok_or_else(|| DomainError::SerializationError(format!("bad check name {name}")))?,
        value,
        threshold,
        status: GuardrailStatus::from_str(&status)
            .ok_or_else(|| DomainError::SerializationError(format!("bad status {status}")))?,
        action: GuardrailAction::from_str(&action)
            .ok_or_else(|| DomainError::SerializationError(format!("bad action {action}")))?,
    })
}

#[async_trait]
impl GuardrailRepository for SqliteGuardrailRepository {
    async fn record(&self, check: &GuardrailCheck) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO guardrail_checks
               (experiment_id, at, name, value, threshold, status, action)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(check.experiment_id.to_string())
        .bind(check.at.to_rfc3339())
        .bind(check.name.as_str())
        .bind(check.value)
        .bind(check.threshold)
        .bind(check.status.as_str())
        .bind(check.action.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(
        &self,
        experiment_id: Uuid,
        name: GuardrailName,
        limit: u32,
    ) -> DomainResult<Vec<GuardrailCheck>> {
        let rows: Vec<CheckRow> = sqlx::query_as(
            r#"SELECT experiment_id, at, name, value, threshold, status, action
               FROM guardrail_checks WHERE experiment_id = ? AND name = ?
               ORDER BY at DESC LIMIT ?"#,
        )
        .bind(experiment_id.to_string())
        .bind(name.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_check).collect()
    }

    async fn list(&self, experiment_id: Uuid, limit: u32) -> DomainResult<Vec<GuardrailCheck>> {
        let rows: Vec<CheckRow> = sqlx::query_as(
            r#"SELECT experiment_id, at, name, value, threshold, status, action
               FROM guardrail_checks WHERE experiment_id = ?
               ORDER BY at DESC LIMIT ?"#,
        )
        .bind(experiment_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_check).collect()
    }

    async fn last_rollback_at(&self, experiment_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"SELECT MAX(at) FROM guardrail_checks
               WHERE experiment_id = ? AND action = 'rollback'"#,
        )
        .bind(experiment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.and_then(|(s,)| s)
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| DomainError::SerializationError(e.to_string()))
            })
            .transpose()
    }
}
