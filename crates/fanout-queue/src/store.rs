//! Queue storage abstraction.
//!
//! Provides trait-based access to the durable notification queue so
//! delivery and management logic run against PostgreSQL in production
//! and an in-memory store in tests and embedded deployments. Every
//! state transition is a conditional write; concurrent workers and
//! management calls can never corrupt a row.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use fanout_core::{
    error::{CoreError, Result},
    models::{NewNotification, NotificationId, NotificationStatus, QueuedNotification},
    time::Clock,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Upper bound on ids accepted by a bulk operation.
pub const MAX_BULK_IDS: usize = 100;

/// Successful delivery details recorded on completion.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// HTTP status of the accepted response.
    pub response_status: i32,
    /// Response body, already truncated for audit.
    pub response_body: String,
}

/// Failed delivery details recorded on retry or terminal failure.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Human-readable error description.
    pub error_details: String,
    /// HTTP status, if a response arrived.
    pub response_status: Option<i32>,
    /// Response body, if one arrived, truncated for audit.
    pub response_body: Option<String>,
}

/// Aggregate queue counts for the management surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total rows in the queue.
    pub total: u64,
    /// Rows waiting for a worker.
    pub pending: u64,
    /// Rows with an attempt in flight.
    pub processing: u64,
    /// Delivered rows.
    pub completed: u64,
    /// Rows with an exhausted retry budget.
    pub failed: u64,
    /// Rows currently paused, across statuses.
    pub paused: u64,
}

/// Storage operations required by delivery workers and the management
/// API.
///
/// Both implementations guarantee that a row is claimed by at most one
/// worker and that status transitions only happen from the expected
/// prior state.
pub trait QueueStore: Send + Sync + 'static {
    /// Enqueues one notification as a new Pending row.
    ///
    /// Never coalesces: every call creates a distinct row, even for an
    /// identical payload and integration.
    fn enqueue(
        &self,
        new: NewNotification,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedNotification>> + Send + '_>>;

    /// Atomically claims due pending rows for delivery.
    ///
    /// A row is due when it is Pending, not paused, and its
    /// `next_retry_at` is unset or in the past. Rows are claimed in
    /// priority order (descending), then enqueue order, and move to
    /// Processing before being returned.
    fn claim_due(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedNotification>>> + Send + '_>>;

    /// Marks a Processing row as Completed with its response details.
    fn mark_completed(
        &self,
        id: NotificationId,
        outcome: DeliveryOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns a Processing row to Pending with a future due time.
    fn schedule_retry(
        &self,
        id: NotificationId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        failure: DeliveryFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks a Processing row as terminally Failed.
    fn mark_failed(
        &self,
        id: NotificationId,
        retry_count: i32,
        failure: DeliveryFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns a claimed Processing row to Pending without recording
    /// an attempt. Used for claims a worker hands back at shutdown.
    fn release(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Manually requeues a Failed or Pending row for immediate
    /// delivery with a fresh retry budget.
    fn retry_now(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Pauses a non-terminal row. Takes effect at the next claim
    /// cycle; an in-flight attempt is never interrupted.
    fn pause(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Clears the pause flag on a row.
    fn resume(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Deletes a row regardless of status.
    fn delete(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Deletes Completed rows last touched before the cutoff. Returns
    /// the number of rows removed.
    fn purge_completed(
        &self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Finds one row by id.
    fn find(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueuedNotification>>> + Send + '_>>;

    /// Lists rows, optionally filtered by status, newest first.
    fn list(
        &self,
        status: Option<NotificationStatus>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedNotification>>> + Send + '_>>;

    /// Aggregate queue counts.
    fn stats(&self) -> Pin<Box<dyn Future<Output = Result<QueueStats>> + Send + '_>>;

    /// Sets the global delivery flag. Workers stop claiming while the
    /// queue is disabled; rows keep accumulating.
    fn set_enabled(&self, enabled: bool)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Reads the global delivery flag.
    fn is_enabled(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;
}

/// Action applied by a bulk management request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Requeue each row for immediate delivery.
    Retry,
    /// Delete each row.
    Delete,
    /// Pause each row.
    Cancel,
}

/// Per-item result of a bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemOutcome {
    /// Row the outcome refers to.
    pub id: NotificationId,
    /// Whether the action applied.
    pub success: bool,
    /// Error description for rejected items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies one action to many rows, reporting per-item outcomes.
///
/// A failing id never aborts the batch. Batches above [`MAX_BULK_IDS`]
/// are rejected outright.
pub async fn bulk_apply(
    store: &dyn QueueStore,
    action: BulkAction,
    ids: &[NotificationId],
) -> Result<Vec<BulkItemOutcome>> {
    if ids.len() > MAX_BULK_IDS {
        return Err(CoreError::InvalidInput(format!(
            "bulk request exceeds {MAX_BULK_IDS} ids: {}",
            ids.len()
        )));
    }

    let mut outcomes = Vec::with_capacity(ids.len());
    for &id in ids {
        let result = match action {
            BulkAction::Retry => store.retry_now(id).await,
            BulkAction::Delete => store.delete(id).await,
            BulkAction::Cancel => store.pause(id).await,
        };
        outcomes.push(match result {
            Ok(()) => BulkItemOutcome { id, success: true, error: None },
            Err(e) => BulkItemOutcome { id, success: false, error: Some(e.to_string()) },
        });
    }
    Ok(outcomes)
}

#[derive(Default)]
struct MemoryState {
    rows: HashMap<NotificationId, QueuedNotification>,
    enabled: bool,
}

/// In-memory queue store.
///
/// Backs tests and embedded deployments. A single write lock around
/// the claim scan gives the same exactly-one-claim guarantee the
/// PostgreSQL store gets from `FOR UPDATE SKIP LOCKED`.
pub struct MemoryQueueStore {
    state: RwLock<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueueStore {
    /// Creates an empty, enabled store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { state: RwLock::new(MemoryState { rows: HashMap::new(), enabled: true }), clock }
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(
        &self,
        new: NewNotification,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedNotification>> + Send + '_>> {
        Box::pin(async move {
            let row = new.into_row(NotificationId::new(), self.clock.now());
            self.state.write().await.rows.insert(row.id, row.clone());
            Ok(row)
        })
    }

    fn claim_due(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedNotification>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;

            let mut due: Vec<NotificationId> = state
                .rows
                .values()
                .filter(|n| {
                    n.status == NotificationStatus::Pending
                        && !n.paused
                        && n.next_retry_at.map_or(true, |at| at <= now)
                })
                .map(|n| n.id)
                .collect();
            due.sort_by(|a, b| {
                let ra = &state.rows[a];
                let rb = &state.rows[b];
                rb.priority.cmp(&ra.priority).then(ra.created_at.cmp(&rb.created_at))
            });
            due.truncate(batch_size);

            let mut claimed = Vec::with_capacity(due.len());
            for id in due {
                if let Some(row) = state.rows.get_mut(&id) {
                    row.status = NotificationStatus::Processing;
                    row.updated_at = now;
                    claimed.push(row.clone());
                }
            }
            Ok(claimed)
        })
    }

    fn mark_completed(
        &self,
        id: NotificationId,
        outcome: DeliveryOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            let row = processing_row(&mut state.rows, id)?;
            row.status = NotificationStatus::Completed;
            row.response_status = Some(outcome.response_status);
            row.response_body = Some(outcome.response_body);
            row.error_details = None;
            row.last_attempt_at = Some(now);
            row.updated_at = now;
            Ok(())
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
            let mut state = self.state.write().await;
            let row = processing_row(&mut state.rows, id)?;
            row.status = NotificationStatus::Pending;
            row.retry_count = retry_count;
            row.next_retry_at = Some(next_retry_at);
            apply_failure(row, failure, now);
            Ok(())
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
            let mut state = self.state.write().await;
            let row = processing_row(&mut state.rows, id)?;
            row.status = NotificationStatus::Failed;
            row.retry_count = retry_count;
            row.next_retry_at = None;
            apply_failure(row, failure, now);
            Ok(())
        })
    }

    fn release(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            let row = processing_row(&mut state.rows, id)?;
            row.status = NotificationStatus::Pending;
            row.updated_at = now;
            Ok(())
        })
    }

    fn retry_now(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            let row = existing_row(&mut state.rows, id)?;
            match row.status {
                NotificationStatus::Failed | NotificationStatus::Pending => {
                    row.status = NotificationStatus::Pending;
                    row.retry_count = 0;
                    row.next_retry_at = None;
                    row.updated_at = now;
                    Ok(())
                },
                other => Err(CoreError::InvalidTransition(format!(
                    "cannot retry notification {id} in status {other}"
                ))),
            }
        })
    }

    fn pause(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            let row = existing_row(&mut state.rows, id)?;
            if row.status.is_terminal() {
                return Err(CoreError::InvalidTransition(format!(
                    "cannot pause notification {id} in status {}",
                    row.status
                )));
            }
            row.paused = true;
            row.updated_at = now;
            Ok(())
        })
    }

    fn resume(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            let row = existing_row(&mut state.rows, id)?;
            row.paused = false;
            row.updated_at = now;
            Ok(())
        })
    }

    fn delete(&self, id: NotificationId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state
                .write()
                .await
                .rows
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| CoreError::NotFound(format!("notification {id} not found")))
        })
    }

    fn purge_completed(
        &self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let before = state.rows.len();
            state.rows.retain(|_, n| {
                n.status != NotificationStatus::Completed || n.updated_at >= older_than
            });
            Ok((before - state.rows.len()) as u64)
        })
    }

    fn find(
        &self,
        id: NotificationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueuedNotification>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.read().await.rows.get(&id).cloned()) })
    }

    fn list(
        &self,
        status: Option<NotificationStatus>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedNotification>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut rows: Vec<QueuedNotification> = state
                .rows
                .values()
                .filter(|n| status.map_or(true, |s| n.status == s))
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            rows.truncate(limit);
            Ok(rows)
        })
    }

    fn stats(&self) -> Pin<Box<dyn Future<Output = Result<QueueStats>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut stats = QueueStats::default();
            for row in state.rows.values() {
                stats.total += 1;
                match row.status {
                    NotificationStatus::Pending => stats.pending += 1,
                    NotificationStatus::Processing => stats.processing += 1,
                    NotificationStatus::Completed => stats.completed += 1,
                    NotificationStatus::Failed => stats.failed += 1,
                }
                if row.paused {
                    stats.paused += 1;
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
            self.state.write().await.enabled = enabled;
            Ok(())
        })
    }

    fn is_enabled(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.read().await.enabled) })
    }
}

fn existing_row(
    rows: &mut HashMap<NotificationId, QueuedNotification>,
    id: NotificationId,
) -> Result<&mut QueuedNotification> {
    rows.get_mut(&id).ok_or_else(|| CoreError::NotFound(format!("notification {id} not found")))
}

fn processing_row(
    rows: &mut HashMap<NotificationId, QueuedNotification>,
    id: NotificationId,
) -> Result<&mut QueuedNotification> {
    let row = existing_row(rows, id)?;
    if row.status != NotificationStatus::Processing {
        return Err(CoreError::InvalidTransition(format!(
            "notification {id} is {}, expected processing",
            row.status
        )));
    }
    Ok(row)
}

fn apply_failure(row: &mut QueuedNotification, failure: DeliveryFailure, now: DateTime<Utc>) {
    row.error_details = Some(failure.error_details);
    row.response_status = failure.response_status;
    row.response_body = failure.response_body;
    row.last_attempt_at = Some(now);
    row.updated_at = now;
}
