//! Queue management surface.

use axum::{
    extract::{Query, State},
    Json,
};
use fanout_core::models::{NotificationId, NotificationStatus};
use fanout_queue::{bulk_apply, BulkAction};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::{error::ApiError, server::AppState};

/// Default row cap for list queries.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Default age threshold for the cleanup action.
const DEFAULT_CLEANUP_HOURS: i64 = 24;

/// Query parameters for `GET /api/management/queue`.
#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    /// Status filter for listing.
    pub status: Option<String>,
    /// Single-row lookup.
    pub id: Option<Uuid>,
    /// Row cap for listing.
    pub limit: Option<usize>,
}

/// Handles `GET /api/management/queue`.
///
/// With `id`, returns that row; with `status`, a filtered listing;
/// bare, the aggregate counts.
pub async fn query_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(id) = query.id {
        let row = state
            .queue
            .find(NotificationId::from(id))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("notification {id} not found")))?;
        return Ok(Json(json!({ "notification": row })));
    }

    if let Some(raw) = query.status.as_deref() {
        let status = NotificationStatus::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid status filter: {raw}")))?;
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let rows = state.queue.list(Some(status), limit).await?;
        return Ok(Json(json!({ "count": rows.len(), "notifications": rows })));
    }

    let stats = state.queue.stats().await?;
    let enabled = state.queue.is_enabled().await?;
    Ok(Json(json!({ "stats": stats, "enabled": enabled })))
}

/// Single-row and queue-wide management actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    /// Requeue one row with a fresh retry budget.
    Retry,
    /// Wake idle delivery workers for an immediate poll.
    Process,
    /// Purge old completed rows.
    Cleanup,
    /// Pause one row.
    Pause,
    /// Clear the pause flag on one row.
    Resume,
    /// Delete one row.
    Delete,
}

impl QueueAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Process => "process",
            Self::Cleanup => "cleanup",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Delete => "delete",
        }
    }
}

/// Request body for `POST /api/management/queue`.
#[derive(Debug, Deserialize)]
pub struct QueueActionRequest {
    /// Action to apply.
    pub action: QueueAction,
    /// Target row for per-row actions.
    pub id: Option<Uuid>,
    /// Age threshold for `cleanup`, in hours.
    pub older_than_hours: Option<i64>,
}

/// Handles `POST /api/management/queue`.
pub async fn queue_action(
    State(state): State<AppState>,
    Json(request): Json<QueueActionRequest>,
) -> Result<Json<Value>, ApiError> {
    match request.action {
        QueueAction::Process => {
            state.wake.notify_waiters();
            info!("immediate queue poll triggered");
            Ok(Json(json!({ "action": "process", "triggered": true })))
        },
        QueueAction::Cleanup => {
            let hours = request.older_than_hours.unwrap_or(DEFAULT_CLEANUP_HOURS);
            if hours < 0 {
                return Err(ApiError::BadRequest(format!(
                    "older_than_hours must be non-negative: {hours}"
                )));
            }
            let cutoff = state.clock.now() - chrono::Duration::hours(hours);
            let purged = state.queue.purge_completed(cutoff).await?;
            info!(purged, hours, "completed notifications purged");
            Ok(Json(json!({ "action": "cleanup", "purged": purged })))
        },
        action => {
            let id = request.id.ok_or_else(|| {
                ApiError::BadRequest(format!("action {} requires an id", action.as_str()))
            })?;
            let id = NotificationId::from(id);

            match action {
                QueueAction::Retry => state.queue.retry_now(id).await?,
                QueueAction::Pause => state.queue.pause(id).await?,
                QueueAction::Resume => state.queue.resume(id).await?,
                QueueAction::Delete => state.queue.delete(id).await?,
                QueueAction::Process | QueueAction::Cleanup => {},
            }

            info!(action = action.as_str(), notification_id = %id, "queue action applied");
            Ok(Json(json!({ "action": action.as_str(), "id": id })))
        },
    }
}

/// Request body for `POST /api/management/queue/bulk`.
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    /// Action applied to every id.
    pub action: BulkAction,
    /// Target rows, at most [`fanout_queue::MAX_BULK_IDS`].
    pub ids: Vec<Uuid>,
}

/// Handles `POST /api/management/queue/bulk`.
///
/// Applies the action per id and reports per-item outcomes; one bad id
/// never fails the batch.
pub async fn bulk_action(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> Result<Json<Value>, ApiError> {
    let ids: Vec<NotificationId> =
        request.ids.into_iter().map(NotificationId::from).collect();

    let outcomes = bulk_apply(state.queue.as_ref(), request.action, &ids).await?;
    let applied = outcomes.iter().filter(|o| o.success).count();

    info!(total = outcomes.len(), applied, action = ?request.action, "bulk action applied");
    Ok(Json(json!({ "applied": applied, "outcomes": outcomes })))
}

/// Handles `GET /api/management/queue/status`.
pub async fn queue_enabled(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let enabled = state.queue.is_enabled().await?;
    Ok(Json(json!({ "enabled": enabled })))
}

/// Request body for `POST /api/management/queue/status`.
#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    /// New global delivery flag.
    pub enabled: bool,
}

/// Handles `POST /api/management/queue/status`.
pub async fn set_queue_enabled(
    State(state): State<AppState>,
    Json(request): Json<EnabledRequest>,
) -> Result<Json<Value>, ApiError> {
    state.queue.set_enabled(request.enabled).await?;
    info!(enabled = request.enabled, "global delivery flag updated");
    Ok(Json(json!({ "enabled": request.enabled })))
}
