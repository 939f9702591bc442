//! SQLite implementation of the CatalogRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Arm, ArmCatalog};
use crate::domain::ports::CatalogRepository;

#[derive(Clone)]
pub struct SqliteCatalogRepository {
    pool: SqlitePool,
}

impl SqliteCatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_opt_instant(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| DomainError::SerializationError(format!("bad timestamp {s}: {e}")))
    })
    .transpose()
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn put(&self, catalog: &ArmCatalog) -> DomainResult<()> {
        catalog.validate()?;
        let mut tx = self.pool.begin().await?;
        for arm in &catalog.arms {
            sqlx::query(
                r#"INSERT OR IGNORE INTO arm_catalog
                   (experiment_id, version, arm_id, metadata, eligible_from, eligible_until)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(catalog.experiment_id.to_string())
            .bind(catalog.version)
            .bind(&arm.arm_id)
            .bind(serde_json::to_string(&arm.metadata)?)
            .bind(arm.eligible_from.map(|t| t.to_rfc3339()))
            .bind(arm.eligible_until.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, experiment_id: Uuid, version: i64) -> DomainResult<Option<ArmCatalog>> {
        let rows: Vec<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"SELECT arm_id, metadata, eligible_from, eligible_until FROM arm_catalog
               WHERE experiment_id = ? AND version = ? ORDER BY arm_id"#,
        )
        .bind(experiment_id.to_string())
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let arms = rows
            .into_iter()
            .map(|(arm_id, metadata, from, until)| {
                Ok(Arm {
                    arm_id,
                    experiment_id,
                    metadata: serde_json::from_str(&metadata)?,
                    eligible_from: parse_opt_instant(from)?,
                    eligible_until: parse_opt_instant(until)?,
                })
            })
            .collect::<DomainResult<Vec<Arm>>>()?;

        Ok(Some(ArmCatalog::new(experiment_id, version, arms)))
    }

    async fn latest_version(&self, experiment_id: Uuid) -> DomainResult<Option<i64>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(version) FROM arm_catalog WHERE experiment_id = ?")
                .bind(experiment_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(v,)| v))
    }
}
