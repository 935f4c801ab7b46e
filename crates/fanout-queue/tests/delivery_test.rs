//! End-to-end delivery tests against a mock destination server.

use std::{sync::Arc, time::Duration};

use fanout_core::{
    models::{
        EndpointId, IntegrationId, NewNotification, NotificationStatus, Platform, RequestId,
    },
    time::TestClock,
};
use fanout_queue::{
    DeliveryClient, DeliveryConfig, DeliveryEngine, DeliveryWorker, EngineStats,
    MemoryQueueStore, QueueStore, RetryPolicy,
};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn new_notification(url: String, max_retries: i32) -> NewNotification {
    NewNotification {
        integration_id: IntegrationId::new(),
        integration_name: "ops-webhook".into(),
        platform: Platform::Webhook,
        webhook_url: url,
        payload: r#"{"DeviceName":"edge-01"}"#.into(),
        content_type: "application/json".into(),
        priority: 0,
        max_retries,
        api_endpoint_id: EndpointId::new(),
        api_endpoint_name: "monitoring".into(),
        api_endpoint_path: "/api/custom/acme/monitoring".into(),
        original_request_id: RequestId::new(),
    }
}

struct Harness {
    store: Arc<MemoryQueueStore>,
    clock: TestClock,
    engine: DeliveryEngine,
}

fn harness() -> Harness {
    let clock = TestClock::new();
    let store = Arc::new(MemoryQueueStore::new(Arc::new(clock.clone())));
    let config = DeliveryConfig { retry_policy: RetryPolicy::without_jitter(), ..Default::default() };
    let engine =
        DeliveryEngine::new(store.clone(), config, Arc::new(clock.clone())).unwrap();
    Harness { store, clock, engine }
}

#[tokio::test]
async fn pending_notification_is_delivered_and_completed() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .and(matchers::body_string(r#"{"DeviceName":"edge-01"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let row = h
        .store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    let processed = h.engine.process_batch().await.unwrap();
    assert_eq!(processed, 1);

    let stored = h.store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Completed);
    assert_eq!(stored.response_status, Some(200));
    assert_eq!(stored.response_body.as_deref(), Some("accepted"));

    let stats = h.engine.stats().await;
    assert_eq!(stats.successful_deliveries, 1);
}

#[tokio::test]
async fn failed_delivery_reschedules_with_exponential_backoff() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let h = harness();
    let row = h
        .store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    h.engine.process_batch().await.unwrap();

    let after_first = h.store.find(row.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, NotificationStatus::Pending);
    assert_eq!(after_first.retry_count, 1);
    assert_eq!(after_first.response_status, Some(503));
    let first_due = after_first.next_retry_at.unwrap();
    assert_eq!(first_due, after_first.last_attempt_at.unwrap() + chrono::Duration::seconds(30));

    // Not due yet, nothing to claim.
    assert_eq!(h.engine.process_batch().await.unwrap(), 0);

    h.clock.advance(Duration::from_secs(30));
    h.engine.process_batch().await.unwrap();

    let after_second = h.store.find(row.id).await.unwrap().unwrap();
    assert_eq!(after_second.retry_count, 2);
    let second_due = after_second.next_retry_at.unwrap();
    assert_eq!(
        second_due,
        after_second.last_attempt_at.unwrap() + chrono::Duration::seconds(60)
    );
}

#[tokio::test]
async fn exhausted_budget_marks_notification_failed() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness();
    let row = h
        .store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 2))
        .await
        .unwrap();

    // Initial attempt plus one retry exhausts a budget of two.
    for _ in 0..2 {
        h.engine.process_batch().await.unwrap();
        h.clock.advance(Duration::from_secs(3600));
    }

    let stored = h.store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert!(stored.next_retry_at.is_none());
    assert!(stored.error_details.as_deref().unwrap_or_default().contains("HTTP 500"));

    // The terminal row is never claimed again.
    assert_eq!(h.engine.process_batch().await.unwrap(), 0);

    let stats = h.engine.stats().await;
    assert_eq!(stats.permanent_failures, 1);
    assert_eq!(stats.rescheduled_deliveries, 1);
}

#[tokio::test]
async fn attempts_stop_at_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let h = harness();
    let row = h
        .store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    // Drain generously; the budget, not the loop, bounds the attempts.
    for _ in 0..6 {
        h.engine.process_batch().await.unwrap();
        h.clock.advance(Duration::from_secs(3600));
    }

    let stored = h.store.find(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.retry_count, 3);

    let attempts = server.received_requests().await.unwrap_or_default().len();
    assert!(attempts <= 3, "at most 3 delivery attempts allowed, observed {attempts}");
}

#[tokio::test]
async fn disabled_queue_is_not_drained() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    let row = h
        .store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    h.store.set_enabled(false).await.unwrap();
    assert_eq!(h.engine.process_batch().await.unwrap(), 0);
    assert_eq!(
        h.store.find(row.id).await.unwrap().unwrap().status,
        NotificationStatus::Pending
    );

    // Re-enabling resumes delivery of the accumulated rows.
    h.store.set_enabled(true).await.unwrap();
    server.reset().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(h.engine.process_batch().await.unwrap(), 1);
    assert_eq!(
        h.store.find(row.id).await.unwrap().unwrap().status,
        NotificationStatus::Completed
    );
}

#[tokio::test]
async fn sibling_notifications_fail_and_succeed_independently() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/good"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/bad"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness();
    let good = h
        .store
        .enqueue(new_notification(format!("{}/good", server.uri()), 3))
        .await
        .unwrap();
    let bad = h
        .store
        .enqueue(new_notification(format!("{}/bad", server.uri()), 3))
        .await
        .unwrap();

    // Initial attempts plus the failing row's two retries.
    for _ in 0..3 {
        h.engine.process_batch().await.unwrap();
        h.clock.advance(Duration::from_secs(3600));
    }

    assert_eq!(
        h.store.find(good.id).await.unwrap().unwrap().status,
        NotificationStatus::Completed
    );
    let failed = h.store.find(bad.id).await.unwrap().unwrap();
    assert_eq!(failed.status, NotificationStatus::Failed);
    assert_eq!(failed.retry_count, 3);
}

#[tokio::test]
async fn cancelled_worker_releases_unattempted_claims() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let clock = TestClock::new();
    let store = Arc::new(MemoryQueueStore::new(Arc::new(clock.clone())));
    let first = store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();
    let second = store
        .enqueue(new_notification(format!("{}/hook", server.uri()), 3))
        .await
        .unwrap();

    let config = DeliveryConfig::default();
    let client = Arc::new(DeliveryClient::new(config.client_config.clone()).unwrap());
    let token = CancellationToken::new();
    token.cancel();
    let worker = DeliveryWorker::new(
        0,
        store.clone(),
        config,
        client,
        Arc::new(RwLock::new(EngineStats::default())),
        token,
        Arc::new(Notify::new()),
        Arc::new(clock.clone()),
    );

    // The batch is claimed, then handed back without an attempt.
    assert_eq!(worker.process_batch().await.unwrap(), 2);

    for id in [first.id, second.id] {
        let row = store.find(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Pending);
        assert_eq!(row.retry_count, 0);
        assert!(row.last_attempt_at.is_none());
    }
}
