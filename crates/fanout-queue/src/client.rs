//! HTTP client for notification delivery.
//!
//! Posts platform-shaped payloads to destination webhooks with a
//! per-request timeout, categorizing failures for retry scheduling and
//! truncating response bodies for audit storage.

use std::time::Duration;

use fanout_core::models::NotificationId;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Response bodies stored on queue rows are capped at this size.
const RESPONSE_BODY_AUDIT_MAX: usize = 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for outgoing requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: "Fanout-Relay/1.0".to_string() }
    }
}

/// One outgoing delivery request.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Queue row being delivered.
    pub notification_id: NotificationId,
    /// Destination webhook URL.
    pub url: String,
    /// Serialized platform payload.
    pub body: String,
    /// MIME type of `body`.
    pub content_type: String,
    /// 1-based attempt number, for logging.
    pub attempt_number: u32,
}

/// Destination response for one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for audit.
    pub body: String,
    /// Total request duration.
    pub duration: Duration,
    /// Whether the status was 2xx.
    pub is_success: bool,
}

/// HTTP client shared by all delivery workers.
///
/// Connection pooling in reqwest makes cloning cheap; workers share
/// one client through an `Arc`.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Posts one notification payload to its destination.
    ///
    /// Non-2xx responses are returned as `Ok` with `is_success` false;
    /// the caller decides how they count against the retry budget.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the request deadline passes and
    /// `Network` for connection-level failures.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start = std::time::Instant::now();

        let span = info_span!(
            "notification_delivery",
            notification_id = %request.notification_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            let response = match self
                .client
                .post(&request.url)
                .header("content-type", &request.content_type)
                .body(request.body.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            let body = match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes),
                Err(e) => format!("[failed to read response body: {e}]"),
            };

            if is_success {
                tracing::debug!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "notification delivered"
                );
            } else {
                tracing::warn!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "destination rejected notification"
                );
            }

            Ok(DeliveryResponse { status_code, body, duration, is_success })
        }
        .instrument(span)
        .await
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() > RESPONSE_BODY_AUDIT_MAX {
        let suffix = "... (truncated)";
        let cut = RESPONSE_BODY_AUDIT_MAX - suffix.len();
        let head = String::from_utf8_lossy(&bytes[..cut]);
        format!("{head}{suffix}")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
