//! Webhook ingestion: the fan-out orchestrator.
//!
//! One inbound request produces one audit record and up to one queue
//! row per enabled integration. Integration failures are isolated; a
//! broken filter or transform never affects siblings, and the caller
//! gets 200 with a per-integration summary whenever the request itself
//! was valid.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Extension, Json,
};
use bytes::Bytes;
use fanout_core::{
    audit::{AttemptStatus, IngestStatus, LoggedIntegrationAttempt, RequestLog},
    models::{
        IngressEndpoint, Integration, NewNotification, Platform, RequestId, DEFAULT_MAX_RETRIES,
    },
};
use fanout_transform::{extract, is_supported_content_type, parse_payload, transform};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::{error::ApiError, server::AppState};

/// Per-integration entry in the ingestion response.
#[derive(Debug, Serialize)]
pub struct IntegrationResult {
    /// Integration name.
    pub integration: String,
    /// Destination platform.
    pub platform: Platform,
    /// Processing outcome.
    pub status: AttemptStatus,
    /// Error details for failed integrations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body for a valid ingestion request.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    /// Correlation ID shared with enqueued notifications.
    pub request_id: RequestId,
    /// Overall outcome.
    pub status: IngestStatus,
    /// Per-integration outcomes, in configuration order.
    pub integrations: Vec<IntegrationResult>,
}

/// Handles `POST /api/custom/{tenant_slug}/{endpoint_name}`.
#[instrument(skip(state, headers, body), fields(tenant = %tenant_slug, endpoint = %endpoint_name))]
pub async fn ingest(
    State(state): State<AppState>,
    Path((tenant_slug, endpoint_name)): Path<(String, String)>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestSummary>, ApiError> {
    let received_at = state.clock.now();
    let (tenant, endpoint) = resolve_endpoint(&state, &tenant_slug, &endpoint_name).await?;

    let source_ip = source_ip(&headers);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if !endpoint.allows_ip(&source_ip) {
        state
            .audit
            .record(RequestLog {
                request_id,
                tenant_id: tenant.id,
                tenant_slug: tenant_slug.clone(),
                endpoint_id: endpoint.id,
                endpoint_name: endpoint_name.clone(),
                source_ip: source_ip.clone(),
                content_type,
                status: IngestStatus::Denied,
                attempts: Vec::new(),
                received_at,
            })
            .await;
        return Err(ApiError::Forbidden(format!("source ip {source_ip} is not whitelisted")));
    }

    if !is_supported_content_type(&content_type) {
        return Err(ApiError::BadRequest(format!("unsupported content type: {content_type}")));
    }
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty request body".to_string()));
    }
    let payload = parse_payload(&content_type, &body)?;

    let integrations = state.config.integrations_for(endpoint.id).await?;
    debug!(integrations = integrations.len(), "fanning out inbound event");

    // One attempt record per associated integration, disabled ones
    // included, created before any processing starts.
    let mut attempts: Vec<LoggedIntegrationAttempt> = integrations
        .iter()
        .map(|integration| LoggedIntegrationAttempt {
            integration_id: integration.id,
            integration_name: integration.name.clone(),
            platform: integration.platform,
            status: if integration.enabled {
                AttemptStatus::FailedTransformation
            } else {
                AttemptStatus::SkippedDisabled
            },
            webhook_url: integration.webhook_url.clone(),
            outgoing_payload: None,
            error_details: None,
        })
        .collect();

    let path = format!("/api/custom/{tenant_slug}/{endpoint_name}");
    for (index, integration) in integrations.iter().enumerate() {
        if !integration.enabled {
            continue;
        }
        match process_integration(&state, &payload, integration, &endpoint, &path, request_id)
            .await
        {
            Ok(outgoing) => {
                attempts[index].status = AttemptStatus::Success;
                attempts[index].outgoing_payload = Some(outgoing);
            },
            Err(error) => {
                warn!(integration = %integration.name, error = %error, "integration failed");
                attempts[index].error_details = Some(error);
            },
        }
    }

    let status = overall_status(&attempts);
    state
        .audit
        .record(RequestLog {
            request_id,
            tenant_id: tenant.id,
            tenant_slug,
            endpoint_id: endpoint.id,
            endpoint_name,
            source_ip,
            content_type,
            status,
            attempts: attempts.clone(),
            received_at,
        })
        .await;

    Ok(Json(IngestSummary {
        request_id,
        status,
        integrations: attempts
            .into_iter()
            .map(|attempt| IntegrationResult {
                integration: attempt.integration_name,
                platform: attempt.platform,
                status: attempt.status,
                error: attempt.error_details,
            })
            .collect(),
    }))
}

/// Handles `GET /api/custom/{tenant_slug}/{endpoint_name}`.
///
/// Liveness probe for monitoring agents: validates the path and the
/// caller's IP exactly like a POST but never parses or enqueues.
pub async fn probe(
    State(state): State<AppState>,
    Path((tenant_slug, endpoint_name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (_tenant, endpoint) = resolve_endpoint(&state, &tenant_slug, &endpoint_name).await?;

    let source_ip = source_ip(&headers);
    if !endpoint.allows_ip(&source_ip) {
        return Err(ApiError::Forbidden(format!("source ip {source_ip} is not whitelisted")));
    }

    let integrations = state.config.integrations_for(endpoint.id).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "endpoint": endpoint.name,
        "integrations": integrations.len(),
    })))
}

/// Resolves the tenant and endpoint named in the path.
///
/// An unknown tenant, an unknown endpoint, and an endpoint owned by a
/// different tenant are indistinguishable to the caller.
async fn resolve_endpoint(
    state: &AppState,
    tenant_slug: &str,
    endpoint_name: &str,
) -> Result<(fanout_core::models::Tenant, IngressEndpoint), ApiError> {
    let not_found =
        || ApiError::NotFound(format!("unknown tenant or endpoint: {tenant_slug}/{endpoint_name}"));

    let tenant = state.config.tenant_by_slug(tenant_slug).await?.ok_or_else(not_found)?;
    let endpoint = state
        .config
        .endpoint_by_name(endpoint_name)
        .await?
        .filter(|endpoint| endpoint.tenant_id == tenant.id)
        .ok_or_else(not_found)?;
    Ok((tenant, endpoint))
}

/// Filters, transforms, and enqueues for one integration.
///
/// Returns the outgoing payload on success and an error description on
/// failure; either way siblings are unaffected.
async fn process_integration(
    state: &AppState,
    payload: &Map<String, Value>,
    integration: &Integration,
    endpoint: &IngressEndpoint,
    path: &str,
    request_id: RequestId,
) -> Result<String, String> {
    // A dangling filter id downgrades to unfiltered forwarding.
    let filter = match integration.field_filter_id {
        Some(id) => match state.config.field_filter(id).await {
            Ok(Some(filter)) => Some(filter),
            Ok(None) => {
                warn!(filter_id = %id, integration = %integration.name, "field filter not found, forwarding unfiltered");
                None
            },
            Err(error) => {
                warn!(filter_id = %id, integration = %integration.name, error = %error, "field filter lookup failed, forwarding unfiltered");
                None
            },
        },
        None => None,
    };

    let (fields, matched_count) = extract(payload, filter.as_ref());
    debug!(integration = %integration.name, matched_count, "fields extracted");

    let transformed =
        transform(&fields, integration.platform).map_err(|error| error.to_string())?;

    state
        .queue
        .enqueue(NewNotification {
            integration_id: integration.id,
            integration_name: integration.name.clone(),
            platform: integration.platform,
            webhook_url: integration.webhook_url.clone(),
            payload: transformed.body.clone(),
            content_type: transformed.content_type,
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            api_endpoint_id: endpoint.id,
            api_endpoint_name: endpoint.name.clone(),
            api_endpoint_path: path.to_string(),
            original_request_id: request_id,
        })
        .await
        .map_err(|error| error.to_string())?;

    Ok(transformed.body)
}

fn overall_status(attempts: &[LoggedIntegrationAttempt]) -> IngestStatus {
    let enabled =
        attempts.iter().filter(|a| a.status != AttemptStatus::SkippedDisabled).count();
    let succeeded = attempts.iter().filter(|a| a.status == AttemptStatus::Success).count();

    if enabled == 0 {
        IngestStatus::NoIntegrationsTriggered
    } else if succeeded == enabled {
        IngestStatus::Success
    } else if succeeded == 0 {
        IngestStatus::TotalFailure
    } else {
        IngestStatus::PartialFailure
    }
}

/// Source IP for the whitelist decision.
///
/// Proxy headers take precedence; absent both, the address is unknown
/// and only an empty whitelist admits the caller.
fn source_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use fanout_core::models::IntegrationId;

    fn attempt(status: AttemptStatus) -> LoggedIntegrationAttempt {
        LoggedIntegrationAttempt {
            integration_id: IntegrationId::new(),
            integration_name: "ops".into(),
            platform: Platform::Discord,
            status,
            webhook_url: "https://example.com/hook".into(),
            outgoing_payload: None,
            error_details: None,
        }
    }

    #[test]
    fn overall_status_reflects_attempt_mix() {
        assert_eq!(overall_status(&[]), IngestStatus::NoIntegrationsTriggered);
        assert_eq!(
            overall_status(&[attempt(AttemptStatus::SkippedDisabled)]),
            IngestStatus::NoIntegrationsTriggered
        );
        assert_eq!(overall_status(&[attempt(AttemptStatus::Success)]), IngestStatus::Success);
        assert_eq!(
            overall_status(&[attempt(AttemptStatus::FailedTransformation)]),
            IngestStatus::TotalFailure
        );
        assert_eq!(
            overall_status(&[
                attempt(AttemptStatus::Success),
                attempt(AttemptStatus::FailedTransformation),
            ]),
            IngestStatus::PartialFailure
        );
        assert_eq!(
            overall_status(&[
                attempt(AttemptStatus::Success),
                attempt(AttemptStatus::SkippedDisabled),
            ]),
            IngestStatus::Success
        );
    }

    #[test]
    fn source_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(source_ip(&headers), "203.0.113.7");

        headers.remove("x-forwarded-for");
        assert_eq!(source_ip(&headers), "10.0.0.2");

        headers.remove("x-real-ip");
        assert_eq!(source_ip(&headers), "unknown");
    }
}
