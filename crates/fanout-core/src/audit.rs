//! Request audit records handed to the external log store.
//!
//! One [`RequestLog`] is produced per inbound request, carrying one
//! [`LoggedIntegrationAttempt`] per associated integration, including
//! disabled ones. The attempt list is built up front as an immutable
//! set of records that the orchestrator updates by index while
//! processing, then emits once.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{EndpointId, IntegrationId, Platform, RequestId, TenantId};

/// Outcome of processing one integration during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Transformed and enqueued.
    Success,
    /// Filter/transform/enqueue failed; siblings were unaffected.
    FailedTransformation,
    /// Integration disabled; recorded but never processed.
    SkippedDisabled,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::FailedTransformation => write!(f, "failed_transformation"),
            Self::SkippedDisabled => write!(f, "skipped_disabled"),
        }
    }
}

/// Audit record for one integration of one inbound request.
///
/// Created once per associated integration at ingestion time and
/// mutated in place as processing completes; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedIntegrationAttempt {
    /// Integration this attempt refers to.
    pub integration_id: IntegrationId,
    /// Integration name at processing time.
    pub integration_name: String,
    /// Destination platform.
    pub platform: Platform,
    /// Processing outcome.
    pub status: AttemptStatus,
    /// Destination webhook URL.
    pub webhook_url: String,
    /// Transformed payload that was (or would have been) enqueued.
    pub outgoing_payload: Option<String>,
    /// Error details for failed transformations.
    pub error_details: Option<String>,
}

/// Overall result of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Every enabled integration enqueued successfully.
    Success,
    /// Some, but not all, enabled integrations enqueued.
    PartialFailure,
    /// Enabled integrations existed but none enqueued.
    TotalFailure,
    /// No enabled integration was associated with the endpoint.
    NoIntegrationsTriggered,
    /// Request rejected before processing (IP not whitelisted).
    Denied,
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::TotalFailure => write!(f, "total_failure"),
            Self::NoIntegrationsTriggered => write!(f, "no_integrations_triggered"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Structured log record for one inbound request, covering every
/// integration attempt it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    /// Correlation ID shared with enqueued notifications.
    pub request_id: RequestId,
    /// Tenant that owns the ingress endpoint.
    pub tenant_id: TenantId,
    /// Tenant slug from the request path.
    pub tenant_slug: String,
    /// Ingress endpoint hit by the request.
    pub endpoint_id: EndpointId,
    /// Endpoint name from the request path.
    pub endpoint_name: String,
    /// Source IP the whitelist decision was made against.
    pub source_ip: String,
    /// Inbound content type.
    pub content_type: String,
    /// Overall outcome.
    pub status: IngestStatus,
    /// Per-integration attempt records.
    pub attempts: Vec<LoggedIntegrationAttempt>,
    /// When the request was received.
    pub received_at: DateTime<Utc>,
}

/// Destination for request audit records.
///
/// Audit *storage* is an external collaborator; the relay only emits.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one request log. Must not fail the ingestion path.
    async fn record(&self, log: RequestLog);
}

/// Audit sink that emits one structured tracing record per request.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, log: RequestLog) {
        info!(
            request_id = %log.request_id,
            tenant = %log.tenant_slug,
            endpoint = %log.endpoint_name,
            source_ip = %log.source_ip,
            status = %log.status,
            attempts = log.attempts.len(),
            "inbound request processed"
        );
    }
}

/// Audit sink that retains records in memory for test assertions.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<RequestLog>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded request logs.
    pub async fn records(&self) -> Vec<RequestLog> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, log: RequestLog) {
        self.records.lock().await.push(log);
    }
}
