//! SQLite implementation of the ReplayRepository.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Context, LoggedEvent};
use crate::domain::ports::ReplayRepository;

#[derive(Clone)]
pub struct SqliteReplayRepository {
    pool: SqlitePool,
}

impl SqliteReplayRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_instant(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("bad timestamp {s}: {e}")))
}

#[async_trait]
impl ReplayRepository for SqliteReplayRepository {
    async fn append(&self, events: &[LoggedEvent]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for event in events {
            if !event.is_valid() {
                tracing::warn!(event_id = %event.event_id, "skipping invalid replay record");
                continue;
            }
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO replay_log
                   (event_id, user_id, context, arm_id, propensity, reward, at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(event.event_id.to_string())
            .bind(&event.user_id)
            .bind(serde_json::to_string(&event.context)?)
            .bind(&event.arm_id)
            .bind(event.propensity)
            .bind(event.reward)
            .bind(event.at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn bounds(&self) -> DomainResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT MIN(at), MAX(at) FROM replay_log")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((Some(min), Some(max))) => {
                Ok(Some((parse_instant(&min)?, parse_instant(&max)?)))
            }
            _ => Ok(None),
        }
    }

    async fn daily_stats(&self) -> DomainResult<HashMap<NaiveDate, (u64, u64)>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"SELECT substr(at, 1, 10), COUNT(*), COUNT(DISTINCT arm_id)
               FROM replay_log GROUP BY substr(at, 1, 10)"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = HashMap::new();
        for (day, count, arms) in rows {
            let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .map_err(|e| DomainError::SerializationError(format!("bad date {day}: {e}")))?;
            stats.insert(date, (count as u64, arms as u64));
        }
        Ok(stats)
    }

    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<LoggedEvent>> {
        let rows: Vec<(String, String, String, String, f64, f64, String)> = sqlx::query_as(
            r#"SELECT event_id, user_id, context, arm_id, propensity, reward, at
               FROM replay_log WHERE at >= ? AND at <= ? ORDER BY at"#,
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(event_id, user_id, context, arm_id, propensity, reward, at)| {
                let context: Context = serde_json::from_str(&context)?;
                Ok(LoggedEvent {
                    event_id: Uuid::parse_str(&event_id)
                        .map_err(|e| DomainError::SerializationError(e.to_string()))?,
                    user_id,
                    context,
                    arm_id,
                    propensity,
                    reward,
                    at: parse_instant(&at)?,
                })
            })
            .collect()
    }

    async fn arms_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT arm_id FROM replay_log WHERE at >= ? AND at <= ? ORDER BY arm_id",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }
}
