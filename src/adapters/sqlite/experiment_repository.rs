//! SQLite implementation of the ExperimentRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DecisionConfig, Experiment, ExperimentStatus, GuardrailConfig, RewardMapping, TrafficPlan,
};
use crate::domain::ports::ExperimentRepository;

#[derive(Clone)]
pub struct SqliteExperimentRepository {
    pool: SqlitePool,
}

impl SqliteExperimentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ExperimentRow {
    id: String,
    name: String,
    status: String,
    surface: String,
    priority: i32,
    salt: String,
    traffic_fraction: f64,
    traffic_plan: String,
    default_policy_id: String,
    catalog_version: i64,
    recognized_context_keys: String,
    attribution_window_secs: i64,
    reward_mapping: String,
    guardrail_config: String,
    decision_config: String,
    start_at: Option<String>,
    end_at: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_instant(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("bad timestamp {s}: {e}")))
}

impl TryFrom<ExperimentRow> for Experiment {
    type Error = DomainError;

    fn try_from(row: ExperimentRow) -> DomainResult<Self> {
        let traffic_plan: TrafficPlan = serde_json::from_str(&row.traffic_plan)?;
        let guardrail_config: GuardrailConfig = serde_json::from_str(&row.guardrail_config)?;
        let decision_config: DecisionConfig = serde_json::from_str(&row.decision_config)?;
        let recognized_context_keys: Vec<String> =
            serde_json::from_str(&row.recognized_context_keys)?;

        Ok(Experiment {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            name: row.name,
            status: ExperimentStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("bad status {}", row.status)))?,
            surface: row.surface,
            priority: row.priority,
            salt: row.salt,
            traffic_fraction: row.traffic_fraction,
            traffic_plan,
            default_policy_id: row.default_policy_id,
            catalog_version: row.catalog_version,
            recognized_context_keys,
            attribution_window_secs: row.attribution_window_secs,
            reward_mapping: RewardMapping::from_str(&row.reward_mapping).ok_or_else(|| {
                DomainError::SerializationError(format!("bad reward mapping {}", row.reward_mapping))
            })?,
            guardrail_config,
            decision_config,
            start_at: row.start_at.as_deref().map(parse_instant).transpose()?,
            end_at: row.end_at.as_deref().map(parse_instant).transpose()?,
            notes: row.notes,
            created_at: parse_instant(&row.created_at)?,
            updated_at: parse_instant(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl ExperimentRepository for SqliteExperimentRepository {
    async fn create(&self, experiment: &Experiment) -> DomainResult<()> {
        experiment.validate()?;
        sqlx::query(
            r#"INSERT INTO experiments (id, name, status, surface, priority, salt,
               traffic_fraction, traffic_plan, default_policy_id, catalog_version,
               recognized_context_keys, attribution_window_secs, reward_mapping,
               guardrail_config, decision_config, start_at, end_at, notes,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(experiment.id.to_string())
        .bind(&experiment.name)
        .bind(experiment.status.as_str())
        .bind(&experiment.surface)
        .bind(experiment.priority)
        .bind(&experiment.salt)
        .bind(experiment.traffic_fraction)
        .bind(serde_json::to_string(&experiment.traffic_plan)?)
        .bind(&experiment.default_policy_id)
        .bind(experiment.catalog_version)
        .bind(serde_json::to_string(&experiment.recognized_context_keys)?)
        .bind(experiment.attribution_window_secs)
        .bind(experiment.reward_mapping.as_str())
        .bind(serde_json::to_string(&experiment.guardrail_config)?)
        .bind(serde_json::to_string(&experiment.decision_config)?)
        .bind(experiment.start_at.map(|t| t.to_rfc3339()))
        .bind(experiment.end_at.map(|t| t.to_rfc3339()))
        .bind(&experiment.notes)
        .bind(experiment.created_at.to_rfc3339())
        .bind(experiment.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Experiment>> {
        let row: Option<ExperimentRow> = sqlx::query_as("SELECT * FROM experiments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Experiment::try_from).transpose()
    }

    async fn update(&self, experiment: &Experiment) -> DomainResult<()> {
        experiment.validate()?;
        let result = sqlx::query(
            r#"UPDATE experiments SET name = ?, status = ?, surface = ?, priority = ?,
               salt = ?, traffic_fraction = ?, traffic_plan = ?, default_policy_id = ?,
               catalog_version = ?, recognized_context_keys = ?, attribution_window_secs = ?,
               reward_mapping = ?, guardrail_config = ?, decision_config = ?,
               start_at = ?, end_at = ?, notes = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&experiment.name)
        .bind(experiment.status.as_str())
        .bind(&experiment.surface)
        .bind(experiment.priority)
        .bind(&experiment.salt)
        .bind(experiment.traffic_fraction)
        .bind(serde_json::to_string(&experiment.traffic_plan)?)
        .bind(&experiment.default_policy_id)
        .bind(experiment.catalog_version)
        .bind(serde_json::to_string(&experiment.recognized_context_keys)?)
        .bind(experiment.attribution_window_secs)
        .bind(experiment.reward_mapping.as_str())
        .bind(serde_json::to_string(&experiment.guardrail_config)?)
        .bind(serde_json::to_string(&experiment.decision_config)?)
        .bind(experiment.start_at.map(|t| t.to_rfc3339()))
        .bind(experiment.end_at.map(|t| t.to_rfc3339()))
        .bind(&experiment.notes)
        .bind(experiment.updated_at.to_rfc3339())
        .bind(experiment.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ExperimentNotFound(experiment.id));
        }
        Ok(())
    }

    async fn list(&self, status: Option<ExperimentStatus>) -> DomainResult<Vec<Experiment>> {
        let rows: Vec<ExperimentRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM experiments WHERE status = ? ORDER BY created_at")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM experiments ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Experiment::try_from).collect()
    }

    async fn active_for_surface(&self, surface: &str) -> DomainResult<Vec<Experiment>> {
        let rows: Vec<ExperimentRow> = sqlx::query_as(
            r#"SELECT * FROM experiments WHERE surface = ? AND status = 'active'
               ORDER BY priority DESC, start_at DESC"#,
        )
        .bind(surface)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Experiment::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
    ) -> DomainResult<bool> {
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE experiments SET status = ?, updated_at = ?,
               start_at = CASE WHEN ? = 'active' AND start_at IS NULL THEN ? ELSE start_at END,
               end_at = CASE WHEN ? IN ('ended', 'killed') THEN ? ELSE end_at END
               WHERE id = ? AND status = ?"#,
        )
        .bind(to.as_str())
        .bind(&now)
        .bind(to.as_str())
        .bind(&now)
        .bind(to.as_str())
        .bind(&now)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
