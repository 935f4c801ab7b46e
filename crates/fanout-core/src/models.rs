//! Core domain models and strongly-typed identifiers.
//!
//! Defines queued notifications, integrations, ingress endpoints, and
//! newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits and the status types that drive the delivery
//! state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed queued notification identifier.
    ///
    /// One notification row exists per (inbound event, integration)
    /// pair; this ID follows the row through its entire delivery
    /// lifecycle.
    NotificationId
}

uuid_id! {
    /// Strongly-typed integration identifier.
    ///
    /// An integration is one configured destination (platform plus
    /// webhook URL).
    IntegrationId
}

uuid_id! {
    /// Strongly-typed ingress endpoint identifier.
    EndpointId
}

uuid_id! {
    /// Strongly-typed identifier of one inbound request.
    ///
    /// Correlates queue rows and audit records back to the inbound
    /// event that produced them.
    RequestId
}

uuid_id! {
    /// Strongly-typed tenant identifier.
    TenantId
}

uuid_id! {
    /// Strongly-typed field filter identifier.
    FilterId
}

/// Destination platform for a configured integration.
///
/// Determines which transformer shapes the outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Discord webhook (rich embed payload).
    Discord,
    /// Slack incoming webhook (Block Kit payload).
    Slack,
    /// Microsoft Teams connector (MessageCard payload).
    Teams,
    /// Generic webhook receiving pretty-printed JSON.
    Webhook,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discord => write!(f, "discord"),
            Self::Slack => write!(f, "slack"),
            Self::Teams => write!(f, "teams"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl sqlx::Type<PgDb> for Platform {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for Platform {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            "teams" => Ok(Self::Teams),
            "webhook" => Ok(Self::Webhook),
            _ => Err(format!("invalid platform: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for Platform {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Queued notification lifecycle status.
///
/// Transitions are enforced by the queue store through conditional
/// writes, never by convention at call sites:
///
/// ```text
/// Pending -> Processing -> Completed
///                       -> Pending   (retry budget remaining)
///                       -> Failed    (budget exhausted, terminal)
/// Failed  -> Pending               (manual retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Waiting for a worker; due when `next_retry_at` is unset or past.
    Pending,

    /// Claimed by a worker, delivery attempt in flight.
    ///
    /// A row in this state cannot be reclaimed, which guarantees at
    /// most one in-flight attempt per notification.
    Processing,

    /// Delivered with a 2xx response. Terminal.
    Completed,

    /// Retry budget exhausted. Terminal until a manual retry.
    Failed,
}

impl NotificationStatus {
    /// Whether this status is terminal for automatic processing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Parses a status from its wire/database form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for NotificationStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for NotificationStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Self::parse(s).ok_or_else(|| format!("invalid notification status: {s}").into())
    }
}

impl sqlx::Encode<'_, PgDb> for NotificationStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Default retry budget for newly enqueued notifications.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// One durable unit of delivery work for one integration.
///
/// Created exactly once per (inbound event, integration) pair at
/// ingestion time. Retries mutate this row; they never create
/// duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedNotification {
    /// Unique identifier for this queue row.
    pub id: NotificationId,

    /// Current delivery status.
    pub status: NotificationStatus,

    /// Pause flag, orthogonal to `status`.
    ///
    /// Paused rows are skipped by the claim query but keep their
    /// retry bookkeeping intact.
    pub paused: bool,

    /// Scheduling priority; higher values are claimed sooner.
    pub priority: i32,

    /// Number of failed delivery attempts so far.
    pub retry_count: i32,

    /// Attempt budget. `retry_count` never exceeds this.
    pub max_retries: i32,

    /// When the next attempt is due; `None` means due now.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When this row was enqueued.
    pub created_at: DateTime<Utc>,

    /// When this row was last mutated.
    pub updated_at: DateTime<Utc>,

    /// Timestamp of the most recent delivery attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Destination integration.
    pub integration_id: IntegrationId,

    /// Destination integration name, denormalized for operators.
    pub integration_name: String,

    /// Destination platform.
    pub platform: Platform,

    /// Destination webhook URL.
    pub webhook_url: String,

    /// Serialized body to send, already platform-shaped.
    pub payload: String,

    /// MIME type of `payload`.
    pub content_type: String,

    /// Error description from the most recent failed attempt.
    pub error_details: Option<String>,

    /// HTTP status from the most recent attempt, if a response arrived.
    pub response_status: Option<i32>,

    /// Response body from the most recent attempt, truncated for audit.
    pub response_body: Option<String>,

    /// Ingress endpoint that produced this notification.
    pub api_endpoint_id: EndpointId,

    /// Ingress endpoint name, denormalized for operators.
    pub api_endpoint_name: String,

    /// Ingress endpoint path, denormalized for operators.
    pub api_endpoint_path: String,

    /// Inbound request that produced this notification.
    pub original_request_id: RequestId,
}

/// Specification for enqueueing one notification.
///
/// Everything the queue store needs to create a `Pending` row; the
/// store fills in id, status, timestamps, and retry bookkeeping.
#[derive(Debug, Clone)]
pub struct NewNotification {
    /// Destination integration.
    pub integration_id: IntegrationId,
    /// Destination integration name.
    pub integration_name: String,
    /// Destination platform.
    pub platform: Platform,
    /// Destination webhook URL.
    pub webhook_url: String,
    /// Serialized body to send.
    pub payload: String,
    /// MIME type of `payload`.
    pub content_type: String,
    /// Scheduling priority; higher is sooner.
    pub priority: i32,
    /// Attempt budget.
    pub max_retries: i32,
    /// Ingress endpoint that produced this notification.
    pub api_endpoint_id: EndpointId,
    /// Ingress endpoint name.
    pub api_endpoint_name: String,
    /// Ingress endpoint path.
    pub api_endpoint_path: String,
    /// Inbound request correlation ID.
    pub original_request_id: RequestId,
}

impl NewNotification {
    /// Materializes a `Pending` queue row from this specification.
    pub fn into_row(self, id: NotificationId, now: DateTime<Utc>) -> QueuedNotification {
        QueuedNotification {
            id,
            status: NotificationStatus::Pending,
            paused: false,
            priority: self.priority,
            retry_count: 0,
            max_retries: self.max_retries,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
            integration_id: self.integration_id,
            integration_name: self.integration_name,
            platform: self.platform,
            webhook_url: self.webhook_url,
            payload: self.payload,
            content_type: self.content_type,
            error_details: None,
            response_status: None,
            response_body: None,
            api_endpoint_id: self.api_endpoint_id,
            api_endpoint_name: self.api_endpoint_name,
            api_endpoint_path: self.api_endpoint_path,
            original_request_id: self.original_request_id,
        }
    }
}

/// Tenant owning ingress endpoints.
///
/// Resolved by an external collaborator; the relay only needs the
/// identity and URL slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique identifier.
    pub id: TenantId,
    /// URL slug used in ingress paths.
    pub slug: String,
    /// Human-readable name.
    pub name: String,
}

/// Tenant-owned ingress path that fans inbound webhooks out to its
/// associated integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressEndpoint {
    /// Unique identifier.
    pub id: EndpointId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Endpoint name used in ingress paths.
    pub name: String,
    /// Allowed source IPs; empty means allow all.
    pub ip_whitelist: Vec<String>,
    /// Integrations this endpoint fans out to.
    pub integration_ids: Vec<IntegrationId>,
}

impl IngressEndpoint {
    /// Checks a source IP against the whitelist.
    ///
    /// An empty whitelist allows every caller.
    pub fn allows_ip(&self, ip: &str) -> bool {
        self.ip_whitelist.is_empty() || self.ip_whitelist.iter().any(|allowed| allowed == ip)
    }
}

/// A configured destination that receives transformed notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    /// Unique identifier.
    pub id: IntegrationId,
    /// Human-readable name.
    pub name: String,
    /// Destination platform.
    pub platform: Platform,
    /// Destination webhook URL.
    pub webhook_url: String,
    /// Disabled integrations are skipped (and the skip is audited).
    pub enabled: bool,
    /// Optional field filter restricting forwarded payload fields.
    pub field_filter_id: Option<FilterId>,
}

/// Named include/exclude rule set restricting forwarded fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Unique identifier.
    pub id: FilterId,
    /// Human-readable name.
    pub name: String,
    /// Exact field names to copy, in order. Empty means "all fields
    /// except `excluded_fields`".
    pub included_fields: Vec<String>,
    /// Field names to drop when `included_fields` is empty.
    pub excluded_fields: Vec<String>,
    /// Sample payload used only for UI previews.
    pub sample_data: Option<String>,
}
