//! SQLite implementation of the DecisionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Decision, PolicyEstimate, Verdict};
use crate::domain::ports::DecisionRepository;

#[derive(Clone)]
pub struct SqliteDecisionRepository {
    pool: SqlitePool,
}

impl SqliteDecisionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type DecisionRow = (String, String, String, Option<String>, f64, f64, String, Option<String>);

fn row_to_decision(row: DecisionRow) -> DomainResult<Decision> {
    let (experiment_id, evaluated_at, verdict, winner, uplift, confidence, estimates, notes) = row;
    let estimates: Vec<PolicyEstimate> = serde_json::from_str(&estimates)?;
    Ok(Decision {
        experiment_id: Uuid::parse_str(&experiment_id)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?,
        evaluated_at: DateTime::parse_from_rfc3339(&evaluated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| DomainError::SerializationError(e.to_string()))?,
        verdict: Verdict::from_str(&verdict)
            .ok_or_else(|| DomainError::SerializationError(format!("bad verdict {verdict}")))?,
        winner_policy_id: winner,
        uplift,
        confidence,
        estimates,
        notes,
    })
}

#[async_trait]
impl DecisionRepository for SqliteDecisionRepository {
    async fn record(&self, decision: &Decision) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO decisions
               (experiment_id, evaluated_at, verdict, winner_policy_id, uplift,
                confidence, estimates, notes)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(decision.experiment_id.to_string())
        .bind(decision.evaluated_at.to_rfc3339())
        .bind(decision.verdict.as_str())
        .bind(&decision.winner_policy_id)
        .bind(decision.uplift)
        .bind(decision.confidence)
        .bind(serde_json::to_string(&decision.estimates)?)
        .bind(&decision.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, experiment_id: Uuid) -> DomainResult<Option<Decision>> {
        let row: Option<DecisionRow> = sqlx::query_as(
            r#"SELECT experiment_id, evaluated_at, verdict, winner_policy_id, uplift,
                      confidence, estimates, notes
               FROM decisions WHERE experiment_id = ?
               ORDER BY evaluated_at DESC LIMIT 1"#,
        )
        .bind(experiment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_decision).transpose()
    }

    async fn list(&self, experiment_id: Uuid) -> DomainResult<Vec<Decision>> {
        let rows: Vec<DecisionRow> = sqlx::query_as(
            r#"SELECT experiment_id, evaluated_at, verdict, winner_policy_id, uplift,
                      confidence, estimates, notes
               FROM decisions WHERE experiment_id = ?
               ORDER BY evaluated_at DESC"#,
        )
        .bind(experiment_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_decision).collect()
    }
}
