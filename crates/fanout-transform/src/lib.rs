//! Payload parsing, field filtering, and platform transformers.
//!
//! Pure functions from inbound request bodies to platform-shaped
//! outgoing payloads. No I/O happens in this crate; the ingestion
//! handler drives it and the queue stores its output.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod error;
pub mod filter;
pub mod parse;
pub mod platform;

pub use classify::{classify, Severity};
pub use error::{Result, TransformError};
pub use filter::extract;
pub use parse::{is_supported_content_type, media_type, parse_payload};
pub use platform::{transform, TransformedPayload};
