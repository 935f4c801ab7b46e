//! HTTP surface: webhook ingestion and queue management.
//!
//! Ingestion fans each valid inbound event out to the endpoint's
//! integrations and enqueues one notification per enabled one; the
//! management routes expose the queue to operators. Storage and
//! configuration come in through the `AppState` seams, so the same
//! router serves production and tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{create_router, start_server, AppState, REQUEST_ID_HEADER};
