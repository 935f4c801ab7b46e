//! Core domain models and shared abstractions.
//!
//! Provides strongly-typed domain primitives, the configuration and
//! audit seams, and the clock abstraction used across the notification
//! relay. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use audit::{
    AttemptStatus, AuditSink, IngestStatus, LoggedIntegrationAttempt, MemoryAuditSink, RequestLog,
    TracingAuditSink,
};
pub use config::{ConfigStore, MemoryConfigStore};
pub use error::{CoreError, Result};
pub use models::{
    EndpointId, FieldFilter, FilterId, IngressEndpoint, Integration, IntegrationId,
    NewNotification, NotificationId, NotificationStatus, Platform, QueuedNotification, RequestId,
    Tenant, TenantId, DEFAULT_MAX_RETRIES,
};
pub use time::{Clock, RealClock, TestClock};
