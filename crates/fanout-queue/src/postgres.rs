//! PostgreSQL-backed queue store.
//!
//! Durable production implementation of [`QueueStore`]. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never contend on the
//! same rows, and every transition is a conditional `UPDATE` keyed on
//! the expected prior status.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use fanout_core::{
    error::{CoreError, Result},
    models::{NewNotification, NotificationId, NotificationStatus, QueuedNotification},
    time::Clock,
};
use sqlx::{PgPool, Row};

use crate::store::{DeliveryFailure, DeliveryOutcome, QueueStats, QueueStore};

/// Schema for the notification queue and its global state row.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS notifications (
    id UUID PRIMARY KEY,
    status TEXT NOT NULL,
    paused BOOLEAN NOT NULL DEFAULT FALSE,
    priority INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    last_attempt_at TIMESTAMPTZ,
    integration_id UUID NOT NULL,
    integration_name TEXT NOT NULL,
    platform TEXT NOT NULL,
    webhook_url TEXT NOT NULL,
    payload TEXT NOT NULL,
    content_type TEXT NOT NULL,
    error_details TEXT,
    response_status INTEGER,
    response_body TEXT,
    api_endpoint_id UUID NOT NULL,
    api_endpoint_name TEXT NOT NULL,
    api_endpoint_path TEXT NOT NULL,
    original_request_id UUID NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_claim
    ON notifications (priority DESC, created_at ASC)
    WHERE status = 'pending' AND paused = FALSE;

CREATE TABLE IF NOT EXISTS queue_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    enabled BOOLEAN NOT NULL DEFAULT TRUE
);
";

/// PostgreSQL queue store.
pub struct PgQueueStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgQueueStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Creates the queue tables and indexes if they do not exist.
    pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }
}

impl QueueStore for PgQueueStore {
    fn enqueue(
        &self,
        new: NewNotification,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedNotification>> + Send + '_>> {
        Box::pin(async move {
            let row = new.into_row(NotificationId::new(), self.clock.now());
            sqlx::query(
                "INSERT INTO notifications (
                    id, status, paused, priority, retry_count, max_retries,
                    next_retry_at, created_at, updated_at, last_attempt_at,
                    integration_id, integration_name, platform, webhook_url,
                    payload, content_type, error_details, response_status,
                    response_body, api_endpoint_id, api_endpoint_name,
                    api_endpoint_path, original_request_id
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                          $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)",
            )
            .bind(row.id)
            .bind(row.status)
            .bind(row.paused)
            .bind(row.priority)
            .bind(row.retry_count)
            .bind(row.max_retries)
            .bind(row.next_retry_at)
            .bind(row.created_at)
            .bind(row.updated_at)
            .bind(row.last_attempt_at)
            .bind(row.integration_id)
            .bind(&row.integration_name)
            .bind(row.platform)
            .bind(&row.webhook_url)
            .bind(&row.payload)
            .bind(&row.content_type)
            .bind(&row.error_details)
            .bind(row.response_status)
            .bind(&row.response_body)
            .bind(row.api_endpoint_id)
            .bind(&row.api_endpoint_name)
            .bind(&row.api_endpoint_path)
            .bind(row.original_request_id)
            .execute(&self.pool)
            .await?;
            Ok(row)
        })
    }

    fn claim_due(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedNotification>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let rows = sqlx::query_as::<_, QueuedNotification>(
                "WITH due AS (
                    SELECT id FROM notifications
                    WHERE status = 'pending'
                      AND paused = FALSE
                      AND (next_retry_at IS NULL OR next_retry_at <= $2)
                    ORDER BY priority DESC, created_at ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE notifications n
                SET status = 'processing', updated_at = $2
                FROM due
                WHERE n.id = due.id
                RETURNING n.*",
            )
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
    }

    fn mark_completed(
        &self,
        id: NotificationId,
        outcome: DeliveryOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "UPDATE notifications
                 SET status = 'completed', response_status = $2, response_body = $3,
                     error_details = NULL, last_attempt_at = $4, updated_at = $4
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(id)
            .bind(outcome.response_status)
            .bind(&outcome.response_body)
            .bind(now)
            .execute(&self.pool)
            .await?;
            expect_transition(result.rows_affected(), id, "completed")
        })
    }

    fn schedule_retry(
        &self,
        id: NotificationId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        failure: DeliveryFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "UPDATE notifications
                 SET status = 'pending', retry_count = $2, next_retry_at = $3,
                     error_details = $4, response_status = $5, response_body = $6,
                     last_attempt_at = $7, updated_at = $7
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(id)
            .bind(retry_count)
            .bind(next_retry_at)
            .bind(&failure.error_details)
            .bind(failure.response_status)
            .bind(&failure.response_body)
            .bind(now)
            .execute(&self.pool)
            .await?;
            expect_transition(result.rows_affected(), id, "pending")
        })
    }

    fn mark_failed(
        &self,
        id: NotificationId,
        retry_count: i32,
        failure: DeliveryFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "UPDATE notifications
                 SET status = 'failed', retry_count = $2, next_retry_at = NULL,
                     error_details = $3, response_status = $4, response_body = $5,
                     last_attempt_at = $6, updated_at = $6
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(id)
            .bind(retry_count)
            .bind(&failure.error_details)
            .bind(failure.response_status)
            .bind(&failure.response_body)
            .bind(now)
            .execute(&self.pool)
            .await?;
            expect_transition(result.rows_affected(), id, "failed")
        })
    }

    fn release(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "UPDATE notifications
                 SET status = 'pending', updated_at = $2
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
            expect_transition(result.rows_affected(), id, "pending")
        })
    }

    fn retry_now(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "UPDATE notifications
                 SET status = 'pending', retry_count = 0, next_retry_at = NULL,
                     updated_at = $2
                 WHERE id = $1 AND status IN ('failed', 'pending')",
            )
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
            expect_transition(result.rows_affected(), id, "pending")
        })
    }

    fn pause(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "UPDATE notifications SET paused = TRUE, updated_at = $2
                 WHERE id = $1 AND status IN ('pending', 'processing')",
            )
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
            expect_transition(result.rows_affected(), id, "paused")
        })
    }

    fn resume(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let result =
                sqlx::query("UPDATE notifications SET paused = FALSE, updated_at = $2 WHERE id = $1")
                    .bind(id)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
            expect_transition(result.rows_affected(), id, "resumed")
        })
    }

    fn delete(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::NotFound(format!("notification {id} not found")));
            }
            Ok(())
        })
    }

    fn purge_completed(
        &self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM notifications WHERE status = 'completed' AND updated_at < $1",
            )
            .bind(older_than)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
    }

    fn find(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueuedNotification>>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, QueuedNotification>(
                "SELECT * FROM notifications WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
    }

    fn list(
        &self,
        status: Option<NotificationStatus>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedNotification>>> + Send + '_>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = match status {
                Some(status) => {
                    sqlx::query_as::<_, QueuedNotification>(
                        "SELECT * FROM notifications WHERE status = $1
                         ORDER BY created_at DESC LIMIT $2",
                    )
                    .bind(status)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                },
                None => {
                    sqlx::query_as::<_, QueuedNotification>(
                        "SELECT * FROM notifications ORDER BY created_at DESC LIMIT $1",
                    )
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                },
            };
            Ok(rows)
        })
    }

    fn stats(&self) -> Pin<Box<dyn Future<Output = Result<QueueStats>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT status, COUNT(*) AS count, COUNT(*) FILTER (WHERE paused) AS paused
                 FROM notifications GROUP BY status",
            )
            .fetch_all(&self.pool)
            .await?;

            let mut stats = QueueStats::default();
            for row in rows {
                let status: String = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                let paused: i64 = row.try_get("paused")?;
                let count = u64::try_from(count).unwrap_or(0);
                stats.total += count;
                stats.paused += u64::try_from(paused).unwrap_or(0);
                match NotificationStatus::parse(&status) {
                    Some(NotificationStatus::Pending) => stats.pending = count,
                    Some(NotificationStatus::Processing) => stats.processing = count,
                    Some(NotificationStatus::Completed) => stats.completed = count,
                    Some(NotificationStatus::Failed) => stats.failed = count,
                    None => {},
                }
            }
            Ok(stats)
        })
    }

    fn set_enabled(
        &self,
        enabled: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO queue_state (id, enabled) VALUES (1, $1)
                 ON CONFLICT (id) DO UPDATE SET enabled = $1",
            )
            .bind(enabled)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn is_enabled(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT enabled FROM queue_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
            // Absent state row means delivery was never disabled.
            Ok(row.map_or(true, |r| r.try_get("enabled").unwrap_or(true)))
        })
    }
}

fn expect_transition(rows_affected: u64, id: NotificationId, target: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(CoreError::InvalidTransition(format!(
            "notification {id} not found or not eligible for transition to {target}"
        )));
    }
    Ok(())
}
