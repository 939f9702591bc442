//! SQLite-backed durable reward-update queue.
//!
//! Co-locates the `reward_updates` topic with the main database. Dequeue
//! leases rows by pushing `available_at` forward, so a crashed worker's
//! batch becomes visible again after the lease expires.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{QueuedUpdate, RewardQueue, RewardUpdate};

/// How long a dequeued row stays invisible before redelivery.
const LEASE_SECS: i64 = 60;

#[derive(Clone)]
pub struct SqliteRewardQueue {
    pool: SqlitePool,
}

impl SqliteRewardQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RewardQueue for SqliteRewardQueue {
    async fn enqueue(&self, update: &RewardUpdate) -> DomainResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT OR IGNORE INTO reward_updates
               (event_id, experiment_id, policy_id, arm_id, context_key, reward,
                attempts, available_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)"#,
        )
        .bind(update.event_id.to_string())
        .bind(update.experiment_id.to_string())
        .bind(&update.policy_id)
        .bind(&update.arm_id)
        .bind(&update.context_key)
        .bind(update.reward)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self, limit: u32, now: DateTime<Utc>) -> DomainResult<Vec<QueuedUpdate>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(i64, String, String, String, String, String, f64, i64)> = sqlx::query_as(
            r#"SELECT id, event_id, experiment_id, policy_id, arm_id, context_key,
                      reward, attempts
               FROM reward_updates WHERE available_at <= ?
               ORDER BY id LIMIT ?"#,
        )
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        let lease_until = (now + Duration::seconds(LEASE_SECS)).to_rfc3339();
        let mut claimed = Vec::with_capacity(rows.len());
        for (id, event_id, experiment_id, policy_id, arm_id, context_key, reward, attempts) in rows
        {
            sqlx::query(
                "UPDATE reward_updates SET available_at = ?, attempts = attempts + 1 WHERE id = ?",
            )
            .bind(&lease_until)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            claimed.push(QueuedUpdate {
                id,
                update: RewardUpdate {
                    event_id: Uuid::parse_str(&event_id)
                        .map_err(|e| DomainError::SerializationError(e.to_string()))?,
                    experiment_id: Uuid::parse_str(&experiment_id)
                        .map_err(|e| DomainError::SerializationError(e.to_string()))?,
                    policy_id,
                    arm_id,
                    context_key,
                    reward,
                },
                attempts: attempts as u32 + 1,
            });
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn ack(&self, id: i64) -> DomainResult<()> {
        sqlx::query("DELETE FROM reward_updates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, id: i64, next_attempt_at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query("UPDATE reward_updates SET available_at = ? WHERE id = ?")
            .bind(next_attempt_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn discard(&self, id: i64) -> DomainResult<()> {
        sqlx::query("DELETE FROM reward_updates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn depth(&self) -> DomainResult<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reward_updates")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }
}
