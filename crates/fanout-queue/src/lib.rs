//! Durable notification queue and delivery pipeline.
//!
//! Stores one queue row per (inbound event, integration) pair and
//! delivers each row to its destination with bounded, exponentially
//! backed-off retries. The queue store is a trait; PostgreSQL backs
//! production while an in-memory store backs tests and embedded use.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod postgres;
pub mod retry;
pub mod store;
pub mod worker;
pub mod worker_pool;

pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use error::{DeliveryError, Result};
pub use postgres::PgQueueStore;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{
    bulk_apply, BulkAction, BulkItemOutcome, DeliveryFailure, DeliveryOutcome, MemoryQueueStore,
    QueueStats, QueueStore, MAX_BULK_IDS,
};
pub use worker::{DeliveryConfig, DeliveryEngine, DeliveryWorker, EngineStats};
pub use worker_pool::WorkerPool;

/// Default number of delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default maximum notifications claimed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;
