//! SQLite implementation of the AssignmentRepository.
//!
//! Writes are first-write-wins per (user, experiment): INSERT OR IGNORE
//! followed by a read-back of whichever row won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Assignment;
use crate::domain::ports::AssignmentRepository;

#[derive(Clone)]
pub struct SqliteAssignmentRepository {
    pool: SqlitePool,
}

impl SqliteAssignmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    user_id: String,
    experiment_id: String,
    policy_id: String,
    bucket: f64,
    salt: String,
    sticky: i64,
    assigned_at: String,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = DomainError;

    fn try_from(row: AssignmentRow) -> DomainResult<Self> {
        Ok(Assignment {
            user_id: row.user_id,
            experiment_id: Uuid::parse_str(&row.experiment_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            policy_id: row.policy_id,
            bucket: row.bucket,
            salt: row.salt,
            sticky: row.sticky != 0,
            assigned_at: DateTime::parse_from_rfc3339(&row.assigned_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
        })
    }
}

#[async_trait]
impl AssignmentRepository for SqliteAssignmentRepository {
    async fn insert_if_absent(&self, assignment: &Assignment) -> DomainResult<Assignment> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO assignments
               (user_id, experiment_id, policy_id, bucket, salt, sticky, assigned_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&assignment.user_id)
        .bind(assignment.experiment_id.to_string())
        .bind(&assignment.policy_id)
        .bind(assignment.bucket)
        .bind(&assignment.salt)
        .bind(i64::from(assignment.sticky))
        .bind(assignment.assigned_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get(&assignment.user_id, assignment.experiment_id)
            .await?
            .ok_or_else(|| DomainError::DatabaseError("assignment row vanished".to_string()))
    }

    async fn get(&self, user_id: &str, experiment_id: Uuid) -> DomainResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM assignments WHERE user_id = ? AND experiment_id = ?",
        )
        .bind(user_id)
        .bind(experiment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Assignment::try_from).transpose()
    }

    async fn count_by_policy(&self, experiment_id: Uuid) -> DomainResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT policy_id, COUNT(*) FROM assignments
               WHERE experiment_id = ? GROUP BY policy_id"#,
        )
        .bind(experiment_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p, n)| (p, n as u64)).collect())
    }

    async fn delete_for_experiment(&self, experiment_id: Uuid) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM assignments WHERE experiment_id = ?")
            .bind(experiment_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
