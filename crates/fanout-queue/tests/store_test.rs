//! In-memory queue store behavior: transitions, claiming, management.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use fanout_core::{
    error::CoreError,
    models::{
        EndpointId, IntegrationId, NewNotification, NotificationId, NotificationStatus, Platform,
        RequestId,
    },
    time::{Clock, TestClock},
};
use fanout_queue::{
    bulk_apply, BulkAction, DeliveryFailure, DeliveryOutcome, MemoryQueueStore, QueueStore,
    MAX_BULK_IDS,
};

fn new_notification(priority: i32, max_retries: i32) -> NewNotification {
    NewNotification {
        integration_id: IntegrationId::new(),
        integration_name: "ops-discord".into(),
        platform: Platform::Discord,
        webhook_url: "https://discord.example/hook".into(),
        payload: r#"{"embeds":[]}"#.into(),
        content_type: "application/json".into(),
        priority,
        max_retries,
        api_endpoint_id: EndpointId::new(),
        api_endpoint_name: "monitoring".into(),
        api_endpoint_path: "/api/custom/acme/monitoring".into(),
        original_request_id: RequestId::new(),
    }
}

fn store_with_clock() -> (Arc<MemoryQueueStore>, TestClock) {
    let clock = TestClock::new();
    let store = Arc::new(MemoryQueueStore::new(Arc::new(clock.clone())));
    (store, clock)
}

fn failure() -> DeliveryFailure {
    DeliveryFailure {
        error_details: "server error: HTTP 503".into(),
        response_status: Some(503),
        response_body: Some("unavailable".into()),
    }
}

#[tokio::test]
async fn enqueue_creates_pending_row() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();

    assert_eq!(row.status, NotificationStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert!(row.next_retry_at.is_none());

    let found = store.find(row.id).await.unwrap().unwrap();
    assert_eq!(found.id, row.id);
}

#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let (store, clock) = store_with_clock();

    let low_old = store.enqueue(new_notification(0, 3)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    let high = store.enqueue(new_notification(5, 3)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    let low_new = store.enqueue(new_notification(0, 3)).await.unwrap();

    let claimed = store.claim_due(10).await.unwrap();
    let ids: Vec<_> = claimed.iter().map(|n| n.id).collect();

    assert_eq!(ids, [high.id, low_old.id, low_new.id]);
    assert!(claimed.iter().all(|n| n.status == NotificationStatus::Processing));

    // Claimed rows cannot be claimed again.
    assert!(store.claim_due(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn paused_rows_are_not_claimed() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.pause(row.id).await.unwrap();

    assert!(store.claim_due(10).await.unwrap().is_empty());

    store.resume(row.id).await.unwrap();
    assert_eq!(store.claim_due(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn scheduled_retry_becomes_due_after_backoff() {
    let (store, clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();

    let due_at = clock.now() + chrono::Duration::seconds(30);
    store.schedule_retry(row.id, 1, due_at, failure()).await.unwrap();

    let stored = store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.response_status, Some(503));
    assert!(stored.last_attempt_at.is_some());

    assert!(store.claim_due(10).await.unwrap().is_empty());

    clock.advance(Duration::from_secs(30));
    assert_eq!(store.claim_due(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn completion_requires_processing_state() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    let outcome = DeliveryOutcome { response_status: 200, response_body: "ok".into() };

    let err = store.mark_completed(row.id, outcome.clone()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition(_)));

    store.claim_due(1).await.unwrap();
    store.mark_completed(row.id, outcome).await.unwrap();

    let stored = store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Completed);
    assert_eq!(stored.response_status, Some(200));
    assert!(stored.error_details.is_none());
}

#[tokio::test]
async fn concurrent_claims_never_overlap() {
    let (store, _clock) = store_with_clock();

    for _ in 0..20 {
        store.enqueue(new_notification(0, 3)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.claim_due(10).await.unwrap() }));
    }

    let mut seen = std::collections::HashSet::new();
    let mut total = 0;
    for handle in handles {
        for row in handle.await.unwrap() {
            assert!(seen.insert(row.id), "row {} claimed twice", row.id);
            total += 1;
        }
    }
    assert_eq!(total, 20);
}

#[tokio::test]
async fn released_claim_returns_to_pending_and_is_claimable() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();

    store.release(row.id).await.unwrap();

    let stored = store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Pending);
    // No attempt was recorded.
    assert_eq!(stored.retry_count, 0);
    assert!(stored.last_attempt_at.is_none());

    assert_eq!(store.claim_due(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn release_requires_processing_state() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    let err = store.release(row.id).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition(_)));
}

#[tokio::test]
async fn manual_retry_grants_fresh_budget() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();
    store.mark_failed(row.id, 3, failure()).await.unwrap();

    store.retry_now(row.id).await.unwrap();

    let stored = store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.next_retry_at.is_none());
}

#[tokio::test]
async fn completed_rows_cannot_be_retried_or_paused() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();
    store
        .mark_completed(row.id, DeliveryOutcome { response_status: 200, response_body: "ok".into() })
        .await
        .unwrap();

    assert!(matches!(
        store.retry_now(row.id).await.unwrap_err(),
        CoreError::InvalidTransition(_)
    ));
    assert!(matches!(store.pause(row.id).await.unwrap_err(), CoreError::InvalidTransition(_)));
}

#[tokio::test]
async fn purge_removes_only_old_completed_rows() {
    let (store, clock) = store_with_clock();

    let done = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();
    store
        .mark_completed(done.id, DeliveryOutcome { response_status: 200, response_body: "".into() })
        .await
        .unwrap();

    clock.advance(Duration::from_secs(3600));
    let pending = store.enqueue(new_notification(0, 3)).await.unwrap();

    let cutoff = clock.now() - chrono::Duration::seconds(60);
    let purged = store.purge_completed(cutoff).await.unwrap();

    assert_eq!(purged, 1);
    assert!(store.find(done.id).await.unwrap().is_none());
    assert!(store.find(pending.id).await.unwrap().is_some());
}

#[tokio::test]
async fn stats_count_each_status() {
    let (store, _clock) = store_with_clock();

    let a = store.enqueue(new_notification(0, 3)).await.unwrap();
    let _b = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.pause(a.id).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.paused, 1);
    assert_eq!(stats.completed, 0);
}

#[tokio::test]
async fn global_flag_round_trips() {
    let (store, _clock) = store_with_clock();

    assert!(store.is_enabled().await.unwrap());
    store.set_enabled(false).await.unwrap();
    assert!(!store.is_enabled().await.unwrap());
    store.set_enabled(true).await.unwrap();
    assert!(store.is_enabled().await.unwrap());
}

#[tokio::test]
async fn bulk_reports_per_item_outcomes() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();
    store.mark_failed(row.id, 3, failure()).await.unwrap();

    let unknown = NotificationId::new();
    let outcomes = bulk_apply(store.as_ref(), BulkAction::Retry, &[row.id, unknown]).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].success);
    assert!(!outcomes[1].success);
    assert!(outcomes[1].error.as_deref().unwrap_or_default().contains("not found"));

    // The good id was still applied.
    let stored = store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Pending);
}

#[tokio::test]
async fn bulk_cancel_pauses_rows() {
    let (store, _clock) = store_with_clock();

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    let outcomes = bulk_apply(store.as_ref(), BulkAction::Cancel, &[row.id]).await.unwrap();

    assert!(outcomes[0].success);
    assert!(store.find(row.id).await.unwrap().unwrap().paused);
}

#[tokio::test]
async fn oversized_bulk_rejected() {
    let (store, _clock) = store_with_clock();

    let ids: Vec<_> = (0..=MAX_BULK_IDS).map(|_| NotificationId::new()).collect();
    let err = bulk_apply(store.as_ref(), BulkAction::Delete, &ids).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));
}

#[tokio::test]
async fn list_filters_by_status() {
    let (store, _clock) = store_with_clock();

    let a = store.enqueue(new_notification(0, 3)).await.unwrap();
    store.claim_due(1).await.unwrap();
    store
        .mark_completed(a.id, DeliveryOutcome { response_status: 204, response_body: "".into() })
        .await
        .unwrap();
    store.enqueue(new_notification(0, 3)).await.unwrap();

    let completed = store.list(Some(NotificationStatus::Completed), 50).await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, a.id);

    let all = store.list(None, 50).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn timestamps_come_from_injected_clock() {
    let clock = TestClock::starting_at(Utc::now());
    let store = MemoryQueueStore::new(Arc::new(clock.clone()));

    let row = store.enqueue(new_notification(0, 3)).await.unwrap();
    assert_eq!(row.created_at, clock.now());
}
