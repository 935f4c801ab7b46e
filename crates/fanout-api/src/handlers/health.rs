//! Service liveness probe.

use axum::Json;
use serde_json::{json, Value};

/// Returns 200 while the process is serving requests.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
