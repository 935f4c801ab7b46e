//! Error types for parsing and transformation.

use thiserror::Error;

/// Result type alias using `TransformError`.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Errors raised while parsing an inbound payload or shaping an
/// outgoing one.
///
/// Transformation errors are scoped to a single integration attempt;
/// the ingestion orchestrator records them and moves on to siblings.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Request body could not be parsed in the declared format.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Declared content type is not one the relay accepts.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Request body was empty.
    #[error("empty request body")]
    EmptyBody,

    /// Parsed payload has no top-level fields to forward.
    #[error("payload contains no fields")]
    NoFields,

    /// Outgoing payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}

impl From<quick_xml::Error> for TransformError {
    fn from(err: quick_xml::Error) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}
