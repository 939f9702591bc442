//! SQLite implementation of the EventRepository.
//!
//! Serve events are append-only. The reward columns are the single mutable
//! region, written through a CAS on `attribution_version` so a reward lands
//! at most once per event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Context, RewardEvent, RewardKind, ServeEvent};
use crate::domain::ports::{EventFilter, EventRepository, PolicyServeStats};

#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ServeEventRow {
    event_id: String,
    experiment_id: String,
    user_id: String,
    policy_id: String,
    arm_id: String,
    position: i32,
    context: String,
    context_key: String,
    propensity: f64,
    score: f64,
    latency_ms: i64,
    served_at: String,
    reward: Option<f64>,
    reward_at: Option<String>,
    attribution_version: i32,
    policy_timeout: i64,
    dropped: i64,
    error: Option<String>,
    schema_version: i32,
}

fn parse_instant(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("bad timestamp {s}: {e}")))
}

impl TryFrom<ServeEventRow> for ServeEvent {
    type Error = DomainError;

    fn try_from(row: ServeEventRow) -> DomainResult<Self> {
        let context: Context = serde_json::from_str(&row.context)?;
        Ok(ServeEvent {
            event_id: Uuid::parse_str(&row.event_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            experiment_id: Uuid::parse_str(&row.experiment_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            user_id: row.user_id,
            policy_id: row.policy_id,
            arm_id: row.arm_id,
            position: row.position,
            context,
            context_key: row.context_key,
            propensity: row.propensity,
            score: row.score,
            latency_ms: row.latency_ms,
            served_at: parse_instant(&row.served_at)?,
            reward: row.reward,
            reward_at: row.reward_at.as_deref().map(parse_instant).transpose()?,
            attribution_version: row.attribution_version,
            policy_timeout: row.policy_timeout != 0,
            dropped: row.dropped != 0,
            error: row.error,
            schema_version: row.schema_version,
        })
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn append_serve(&self, event: &ServeEvent) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO serve_events
               (event_id, experiment_id, user_id, policy_id, arm_id, position, context,
                context_key, propensity, score, latency_ms, served_at, reward, reward_at,
                attribution_version, policy_timeout, dropped, error, schema_version)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.event_id.to_string())
        .bind(event.experiment_id.to_string())
        .bind(&event.user_id)
        .bind(&event.policy_id)
        .bind(&event.arm_id)
        .bind(event.position)
        .bind(serde_json::to_string(&event.context)?)
        .bind(&event.context_key)
        .bind(event.propensity)
        .bind(event.score)
        .bind(event.latency_ms)
        .bind(event.served_at.to_rfc3339())
        .bind(event.reward)
        .bind(event.reward_at.map(|t| t.to_rfc3339()))
        .bind(event.attribution_version)
        .bind(i64::from(event.policy_timeout))
        .bind(i64::from(event.dropped))
        .bind(&event.error)
        .bind(event.schema_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_serve(&self, event_id: Uuid) -> DomainResult<Option<ServeEvent>> {
        let row: Option<ServeEventRow> =
            sqlx::query_as("SELECT * FROM serve_events WHERE event_id = ?")
                .bind(event_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(ServeEvent::try_from).transpose()
    }

    async fn append_reward(&self, reward: &RewardEvent) -> DomainResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO reward_events (event_id, kind, value, at) VALUES (?, ?, ?, ?)",
        )
        .bind(reward.event_id.to_string())
        .bind(reward.kind.as_str())
        .bind(reward.value)
        .bind(reward.at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rewards_for_event(&self, event_id: Uuid) -> DomainResult<Vec<RewardEvent>> {
        let rows: Vec<(String, f64, String)> = sqlx::query_as(
            "SELECT kind, value, at FROM reward_events WHERE event_id = ? ORDER BY at",
        )
        .bind(event_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(kind, value, at)| {
                Ok(RewardEvent {
                    event_id,
                    kind: RewardKind::from_str(&kind)
                        .ok_or_else(|| DomainError::UnknownRewardKind(kind.clone()))?,
                    value,
                    at: parse_instant(&at)?,
                })
            })
            .collect()
    }

    async fn serves_for_user_arm(
        &self,
        user_id: &str,
        arm_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<ServeEvent>> {
        let rows: Vec<ServeEventRow> = sqlx::query_as(
            r#"SELECT * FROM serve_events
               WHERE user_id = ? AND arm_id = ? AND served_at >= ? AND served_at <= ?
               ORDER BY served_at DESC"#,
        )
        .bind(user_id)
        .bind(arm_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ServeEvent::try_from).collect()
    }

    async fn attribute(
        &self,
        event_id: Uuid,
        reward: f64,
        reward_at: DateTime<Utc>,
        expected_version: i32,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE serve_events
               SET reward = ?, reward_at = ?, attribution_version = attribution_version + 1
               WHERE event_id = ? AND attribution_version = ? AND reward IS NULL"#,
        )
        .bind(reward)
        .bind(reward_at.to_rfc3339())
        .bind(event_id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unattributed_before(
        &self,
        experiment_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<ServeEvent>> {
        let rows: Vec<ServeEventRow> = sqlx::query_as(
            r#"SELECT * FROM serve_events
               WHERE experiment_id = ? AND reward IS NULL AND served_at < ?
               ORDER BY served_at LIMIT ?"#,
        )
        .bind(experiment_id.to_string())
        .bind(cutoff.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ServeEvent::try_from).collect()
    }

    async fn serve_stats(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<PolicyServeStats>> {
        let rows: Vec<(String, i64, i64, i64, i64, i64, Option<f64>)> = sqlx::query_as(
            r#"SELECT policy_id,
                      COUNT(*),
                      SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END),
                      SUM(policy_timeout),
                      SUM(dropped),
                      SUM(CASE WHEN reward IS NOT NULL THEN 1 ELSE 0 END),
                      AVG(reward)
               FROM serve_events
               WHERE experiment_id = ? AND served_at >= ? AND served_at <= ?
               GROUP BY policy_id"#,
        )
        .bind(experiment_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(policy_id, serves, errors, timeouts, dropped, attributed, mean)| {
                PolicyServeStats {
                    policy_id,
                    serves: serves as u64,
                    errors: errors as u64,
                    timeouts: timeouts as u64,
                    dropped: dropped as u64,
                    attributed: attributed as u64,
                    mean_reward: mean.unwrap_or(0.0),
                }
            })
            .collect())
    }

    async fn latency_p95(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Option<f64>> {
        let count: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM serve_events
               WHERE experiment_id = ? AND served_at >= ? AND served_at <= ?"#,
        )
        .bind(experiment_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        if count.0 == 0 {
            return Ok(None);
        }
        // Nearest-rank p95: skip 95% of rows in latency order.
        let offset = ((count.0 - 1) as f64 * 0.95).floor() as i64;
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT latency_ms FROM serve_events
               WHERE experiment_id = ? AND served_at >= ? AND served_at <= ?
               ORDER BY latency_ms LIMIT 1 OFFSET ?"#,
        )
        .bind(experiment_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(ms,)| ms as f64))
    }

    async fn arm_counts(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT arm_id, COUNT(*) FROM serve_events
               WHERE experiment_id = ? AND served_at >= ? AND served_at <= ?
               GROUP BY arm_id"#,
        )
        .bind(experiment_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(a, n)| (a, n as u64)).collect())
    }

    async fn attributed_events(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<ServeEvent>> {
        let rows: Vec<ServeEventRow> = sqlx::query_as(
            r#"SELECT * FROM serve_events
               WHERE experiment_id = ? AND reward IS NOT NULL
                 AND served_at >= ? AND served_at <= ?
               ORDER BY served_at"#,
        )
        .bind(experiment_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ServeEvent::try_from).collect()
    }

    async fn list(&self, filter: EventFilter) -> DomainResult<Vec<ServeEvent>> {
        let mut query = String::from("SELECT * FROM serve_events WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(experiment_id) = &filter.experiment_id {
            query.push_str(" AND experiment_id = ?");
            bindings.push(experiment_id.to_string());
        }
        if let Some(policy_id) = &filter.policy_id {
            query.push_str(" AND policy_id = ?");
            bindings.push(policy_id.clone());
        }
        if let Some(arm_id) = &filter.arm_id {
            query.push_str(" AND arm_id = ?");
            bindings.push(arm_id.clone());
        }
        if let Some(user_id) = &filter.user_id {
            query.push_str(" AND user_id = ?");
            bindings.push(user_id.clone());
        }
        if filter.attributed_only {
            query.push_str(" AND reward IS NOT NULL");
        }
        if let Some(from) = &filter.from {
            query.push_str(" AND served_at >= ?");
            bindings.push(from.to_rfc3339());
        }
        if let Some(to) = &filter.to {
            query.push_str(" AND served_at <= ?");
            bindings.push(to.to_rfc3339());
        }
        query.push_str(" ORDER BY served_at DESC LIMIT ? OFFSET ?");

        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let mut q = sqlx::query_as::<_, ServeEventRow>(&query);
        for b in &bindings {
            q = q.bind(b);
        }
        let rows = q
            .bind(i64::from(limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ServeEvent::try_from).collect()
    }

    async fn first_serve_at(&self, experiment_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT MIN(served_at) FROM serve_events WHERE experiment_id = ?")
                .bind(experiment_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.and_then(|(s,)| s)
            .as_deref()
            .map(parse_instant)
            .transpose()
    }
}
