//! HTTP server setup and routing.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use fanout_core::{audit::AuditSink, config::ConfigStore, models::RequestId, time::Clock};
use fanout_queue::QueueStore;
use tokio::sync::Notify;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers;

/// Request timeout for the HTTP surface.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlation header added to every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Resolved tenant, endpoint, integration, and filter records.
    pub config: Arc<dyn ConfigStore>,
    /// Durable notification queue.
    pub queue: Arc<dyn QueueStore>,
    /// Destination for request audit records.
    pub audit: Arc<dyn AuditSink>,
    /// Time source shared with the queue and delivery workers.
    pub clock: Arc<dyn Clock>,
    /// Wakes idle delivery workers for an immediate poll.
    pub wake: Arc<Notify>,
}

/// Builds the application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // SOAPAction is sent by SOAP monitoring agents on preflight.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("soapaction"),
        ]);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/custom/{tenant_slug}/{endpoint_name}",
            post(handlers::ingest::ingest).get(handlers::ingest::probe),
        )
        .route(
            "/api/management/queue",
            get(handlers::manage::query_queue).post(handlers::manage::queue_action),
        )
        .route("/api/management/queue/bulk", post(handlers::manage::bulk_action))
        .route(
            "/api/management/queue/status",
            get(handlers::manage::queue_enabled).post(handlers::manage::set_queue_enabled),
        )
        .layer(middleware::from_fn(inject_request_id))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Assigns each request a correlation ID and echoes it in the
/// response. Enqueued notifications carry the same ID.
async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Binds the listener and serves until a shutdown signal arrives.
///
/// # Errors
///
/// Returns error if binding or serving fails.
pub async fn start_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await
}

/// Resolves when the process receives CTRL-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
}
