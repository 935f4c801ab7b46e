//! Delivery engine and worker loop.
//!
//! Workers poll the queue store for due notifications, post them to
//! their destinations, and record the outcome. Claiming happens in the
//! store under `FOR UPDATE SKIP LOCKED` semantics, so any number of
//! workers across any number of processes cooperate safely.

use std::{sync::Arc, time::Duration};

use fanout_core::{models::QueuedNotification, time::Clock};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
    retry::{RetryDecision, RetryPolicy},
    store::{DeliveryFailure, DeliveryOutcome, QueueStore},
    worker_pool::WorkerPool,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Maximum notifications to claim per worker batch.
    pub batch_size: usize,

    /// How often workers poll for due notifications.
    pub poll_interval: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Backoff policy for failed deliveries.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Statistics for engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of active delivery workers.
    pub active_workers: usize,
    /// Notifications processed since startup.
    pub notifications_processed: u64,
    /// Successful deliveries.
    pub successful_deliveries: u64,
    /// Failed attempts that were rescheduled.
    pub rescheduled_deliveries: u64,
    /// Notifications that exhausted their retry budget.
    pub permanent_failures: u64,
    /// Deliveries currently in flight.
    pub in_flight_deliveries: u64,
}

/// Delivery engine coordinating the worker pool over one queue store.
pub struct DeliveryEngine {
    store: Arc<dyn QueueStore>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    wake: Arc<Notify>,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates an engine over the given store.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery client cannot be initialized.
    pub fn new(
        store: Arc<dyn QueueStore>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);
        Ok(Self {
            store,
            config,
            client,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
            worker_pool: None,
            clock,
        })
    }

    /// Handle that wakes idle workers for an immediate poll.
    ///
    /// The management `process` action uses this so an operator does
    /// not wait out the poll interval.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Starts the configured worker pool.
    ///
    /// Returns immediately after spawning workers; use `shutdown()` to
    /// stop gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the worker pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting delivery engine"
        );

        let mut pool = WorkerPool::new(
            self.store.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.wake.clone(),
            self.clock.clone(),
        );
        pool.spawn_workers().await?;
        self.worker_pool = Some(pool);

        info!("delivery engine started");
        Ok(())
    }

    /// Gracefully shuts down the engine, waiting for in-flight
    /// deliveries to finish.
    ///
    /// # Errors
    ///
    /// Returns error if shutdown exceeds the configured timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Claims and processes exactly one batch synchronously.
    ///
    /// Designed for tests and controlled draining; does not spawn
    /// background workers.
    ///
    /// # Errors
    ///
    /// Returns error if claiming fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let worker = DeliveryWorker::new(
            0,
            self.store.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.wake.clone(),
            self.clock.clone(),
        );
        worker.process_batch().await
    }
}

/// Individual worker that processes notification deliveries.
pub struct DeliveryWorker {
    id: usize,
    store: Arc<dyn QueueStore>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    wake: Arc<Notify>,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a worker with the given configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        store: Arc<dyn QueueStore>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        wake: Arc<Notify>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, store, config, client, stats, cancellation_token, wake, clock }
    }

    /// Main worker loop. Claims and processes batches until cancelled.
    ///
    /// # Errors
    ///
    /// Batch errors are logged and retried; only setup failures
    /// propagate.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.process_batch().await {
                Ok(processed) if processed > 0 => {},
                Ok(_) => self.idle(self.config.poll_interval).await,
                Err(error) => {
                    error!(worker_id = self.id, error = %error, "worker cycle failed");
                    self.idle(Duration::from_secs(5)).await;
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Waits for the poll interval, a management wake, or shutdown.
    async fn idle(&self, duration: Duration) {
        tokio::select! {
            () = self.clock.sleep(duration) => {},
            () = self.wake.notified() => {
                debug!(worker_id = self.id, "woken for immediate poll");
            },
            () = self.cancellation_token.cancelled() => {},
        }
    }

    /// Claims and processes one batch of due notifications.
    ///
    /// # Errors
    ///
    /// Returns error if claiming fails. Individual delivery failures
    /// are recorded on their rows and never abort the batch.
    pub async fn process_batch(&self) -> Result<usize> {
        // Global pause leaves rows accumulating untouched.
        if !self.store.is_enabled().await? {
            return Ok(0);
        }

        let claimed = self.store.claim_due(self.config.batch_size).await?;
        let batch_size = claimed.len();

        if batch_size > 0 {
            debug!(worker_id = self.id, batch_size, "processing notification batch");
        }

        let mut remaining = claimed.into_iter();
        for notification in remaining.by_ref() {
            if self.cancellation_token.is_cancelled() {
                self.release_claim(notification).await;
                break;
            }
            if let Err(error) = self.process_notification(notification).await {
                error!(worker_id = self.id, error = %error, "notification processing failed");
            }
        }

        // Claims not yet attempted go back to pending instead of
        // stranding in processing across a shutdown.
        for notification in remaining {
            self.release_claim(notification).await;
        }

        Ok(batch_size)
    }

    async fn release_claim(&self, notification: QueuedNotification) {
        if let Err(error) = self.store.release(notification.id).await {
            error!(
                worker_id = self.id,
                notification_id = %notification.id,
                error = %error,
                "failed to release unattempted claim"
            );
        } else {
            debug!(
                worker_id = self.id,
                notification_id = %notification.id,
                "released unattempted claim"
            );
        }
    }

    async fn process_notification(&self, notification: QueuedNotification) -> Result<()> {
        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let result = self.attempt_delivery(&notification).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries -= 1;
            stats.notifications_processed += 1;
        }

        result
    }

    async fn attempt_delivery(&self, notification: &QueuedNotification) -> Result<()> {
        let attempt_number = u32::try_from(notification.retry_count + 1).unwrap_or(u32::MAX);

        let request = DeliveryRequest {
            notification_id: notification.id,
            url: notification.webhook_url.clone(),
            body: notification.payload.clone(),
            content_type: notification.content_type.clone(),
            attempt_number,
        };

        match self.client.deliver(request).await {
            Ok(response) if response.is_success => {
                self.store
                    .mark_completed(
                        notification.id,
                        DeliveryOutcome {
                            response_status: i32::from(response.status_code),
                            response_body: response.body,
                        },
                    )
                    .await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.successful_deliveries += 1;
                }

                info!(
                    worker_id = self.id,
                    notification_id = %notification.id,
                    integration = %notification.integration_name,
                    status_code = response.status_code,
                    duration_ms = response.duration.as_millis(),
                    "notification delivered"
                );
                Ok(())
            },
            Ok(response) => {
                let error = DeliveryError::from_response(response.status_code, response.body);
                self.handle_failure(notification, &error).await
            },
            Err(error) => self.handle_failure(notification, &error).await,
        }
    }

    async fn handle_failure(
        &self,
        notification: &QueuedNotification,
        error: &DeliveryError,
    ) -> Result<()> {
        let failed_at = self.clock.now();
        let failure = DeliveryFailure {
            error_details: error.to_string(),
            response_status: error.response_status(),
            response_body: error.response_body().map(ToString::to_string),
        };
        let new_count = notification.retry_count.saturating_add(1);

        match self.config.retry_policy.decide(notification, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                self.store
                    .schedule_retry(notification.id, new_count, next_attempt_at, failure)
                    .await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.rescheduled_deliveries += 1;
                }

                warn!(
                    worker_id = self.id,
                    notification_id = %notification.id,
                    integration = %notification.integration_name,
                    retry_count = new_count,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "delivery failed, retry scheduled"
                );
            },
            RetryDecision::GiveUp { reason } => {
                let final_count = new_count.min(notification.max_retries);
                self.store.mark_failed(notification.id, final_count, failure).await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.permanent_failures += 1;
                }

                warn!(
                    worker_id = self.id,
                    notification_id = %notification.id,
                    integration = %notification.integration_name,
                    reason = %reason,
                    error = %error,
                    "delivery failed terminally"
                );
            },
        }
        Ok(())
    }
}
