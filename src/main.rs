//! Fanout webhook notification relay.
//!
//! Entry point wiring the queue store, delivery engine, and HTTP
//! surface together, with graceful startup and shutdown.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use fanout_api::AppState;
use fanout_core::{
    audit::TracingAuditSink,
    config::MemoryConfigStore,
    models::{FieldFilter, IngressEndpoint, Integration, Tenant},
    time::RealClock,
};
use fanout_queue::{DeliveryConfig, DeliveryEngine, PgQueueStore};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting fanout notification relay");

    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url_masked(),
        server_addr = %config.server_addr,
        worker_count = config.worker_count,
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    PgQueueStore::ensure_schema(&db_pool).await.context("failed to ensure queue schema")?;
    info!("queue schema ready");

    let clock = Arc::new(RealClock::new());
    let queue = Arc::new(PgQueueStore::new(db_pool.clone(), clock.clone()));

    let config_store = load_relay_config(&config.relay_config_path).await?;

    let delivery_config = DeliveryConfig {
        worker_count: config.worker_count,
        batch_size: config.batch_size,
        ..DeliveryConfig::default()
    };
    let mut engine = DeliveryEngine::new(queue.clone(), delivery_config, clock.clone())
        .context("failed to create delivery engine")?;
    let wake = engine.wake_handle();
    engine.start().await.context("failed to start delivery workers")?;

    let state = AppState {
        config: config_store,
        queue,
        audit: Arc::new(TracingAuditSink),
        clock,
        wake,
    };

    info!(addr = %config.server_addr, "fanout is ready to receive webhooks");

    // Serves until CTRL-C or SIGTERM.
    if let Err(e) = fanout_api::start_server(state, config.server_addr).await {
        error!(error = %e, "server failed");
    }

    info!("draining delivery workers");
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine shutdown failed");
    }

    db_pool.close().await;
    info!("fanout shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,fanout=debug,tower_http=debug"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Resolved relay configuration snapshot: tenants, ingress endpoints,
/// integrations, and field filters.
///
/// Tenant and integration management live in an external system; this
/// process consumes a snapshot exported to JSON.
#[derive(Debug, Default, Deserialize)]
struct RelayConfigFile {
    #[serde(default)]
    tenants: Vec<Tenant>,
    #[serde(default)]
    endpoints: Vec<IngressEndpoint>,
    #[serde(default)]
    integrations: Vec<Integration>,
    #[serde(default)]
    filters: Vec<FieldFilter>,
}

/// Loads the relay configuration snapshot into the in-process store.
async fn load_relay_config(path: &str) -> Result<Arc<MemoryConfigStore>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read relay config: {path}"))?;
    let file: RelayConfigFile =
        serde_json::from_str(&raw).with_context(|| format!("invalid relay config: {path}"))?;

    info!(
        tenants = file.tenants.len(),
        endpoints = file.endpoints.len(),
        integrations = file.integrations.len(),
        filters = file.filters.len(),
        "relay configuration loaded"
    );

    let store = MemoryConfigStore::new();
    for tenant in file.tenants {
        store.add_tenant(tenant).await;
    }
    for endpoint in file.endpoints {
        store.add_endpoint(endpoint).await;
    }
    for integration in file.integrations {
        store.add_integration(integration).await;
    }
    for filter in file.filters {
        store.add_filter(filter).await;
    }
    Ok(Arc::new(store))
}

/// Service configuration.
struct Config {
    /// PostgreSQL connection string.
    database_url: String,
    /// Maximum database connections.
    database_max_connections: u32,
    /// Server bind address.
    server_addr: SocketAddr,
    /// Path to the relay configuration snapshot.
    relay_config_path: String,
    /// Number of delivery workers.
    worker_count: usize,
    /// Notifications claimed per worker batch.
    batch_size: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid SERVER_ADDR format")?;

        let relay_config_path = std::env::var("FANOUT_CONFIG_PATH")
            .unwrap_or_else(|_| "fanout-config.json".to_string());

        let worker_count = std::env::var("FANOUT_WORKER_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(fanout_queue::DEFAULT_WORKER_COUNT);

        let batch_size = std::env::var("FANOUT_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(fanout_queue::DEFAULT_BATCH_SIZE);

        Ok(Self {
            database_url,
            database_max_connections,
            server_addr,
            relay_config_path,
            worker_count,
            batch_size,
        })
    }

    /// Returns the database URL with credentials masked for logging.
    fn database_url_masked(&self) -> String {
        match self.database_url.find('@') {
            Some(at) => format!("postgresql://***@{}", &self.database_url[at + 1..]),
            None => "postgresql://***".to_string(),
        }
    }
}
