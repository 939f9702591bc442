//! SQLite implementation of the PolicyRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PolicyConfig, PolicyParams};
use crate::domain::ports::PolicyRepository;

#[derive(Clone)]
pub struct SqlitePolicyRepository {
    pool: SqlitePool,
}

impl SqlitePolicyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(experiment_id: &str, id: String, params: &str) -> DomainResult<PolicyConfig> {
        // An unrecognized tag in stored params is an unknown policy kind.
        let params: PolicyParams = serde_json::from_str(params)
            .map_err(|_| DomainError::UnknownPolicy(params.to_string()))?;
        Ok(PolicyConfig {
            id,
            experiment_id: Uuid::parse_str(experiment_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            params,
        })
    }
}

#[async_trait]
impl PolicyRepository for SqlitePolicyRepository {
    async fn create(&self, policy: &PolicyConfig) -> DomainResult<()> {
        policy.validate()?;
        sqlx::query("INSERT INTO policies (experiment_id, id, params) VALUES (?, ?, ?)")
            .bind(policy.experiment_id.to_string())
            .bind(&policy.id)
            .bind(serde_json::to_string(&policy.params)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        experiment_id: Uuid,
        policy_id: &str,
    ) -> DomainResult<Option<PolicyConfig>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT id, params FROM policies WHERE experiment_id = ? AND id = ?",
        )
        .bind(experiment_id.to_string())
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, params)| Self::from_row(&experiment_id.to_string(), id, &params))
            .transpose()
    }

    async fn list_for_experiment(&self, experiment_id: Uuid) -> DomainResult<Vec<PolicyConfig>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, params FROM policies WHERE experiment_id = ? ORDER BY id",
        )
        .bind(experiment_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, params)| Self::from_row(&experiment_id.to_string(), id, &params))
            .collect()
    }
}
