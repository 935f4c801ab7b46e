//! Resolved-configuration access for the ingestion pipeline.
//!
//! Tenant, endpoint, integration, and field filter management is an
//! external concern; the relay consumes the resolved records through
//! the [`ConfigStore`] seam. [`MemoryConfigStore`] is the in-process
//! implementation used by tests and embedded deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    error::Result,
    models::{
        EndpointId, FieldFilter, FilterId, IngressEndpoint, Integration, IntegrationId, Tenant,
    },
};

/// Read access to resolved relay configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Resolves a tenant by its URL slug.
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>>;

    /// Resolves an ingress endpoint by name.
    ///
    /// Tenant association is checked by the caller; a mismatch is
    /// indistinguishable from not-found at the HTTP surface.
    async fn endpoint_by_name(&self, name: &str) -> Result<Option<IngressEndpoint>>;

    /// Resolves the integrations associated with an endpoint, in
    /// configuration order. Unknown IDs are skipped.
    async fn integrations_for(&self, endpoint_id: EndpointId) -> Result<Vec<Integration>>;

    /// Resolves a field filter by id.
    async fn field_filter(&self, id: FilterId) -> Result<Option<FieldFilter>>;
}

#[derive(Default)]
struct ConfigInner {
    tenants: Vec<Tenant>,
    endpoints: Vec<IngressEndpoint>,
    integrations: HashMap<IntegrationId, Integration>,
    filters: HashMap<FilterId, FieldFilter>,
}

/// In-memory configuration store.
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: RwLock<ConfigInner>,
}

impl MemoryConfigStore {
    /// Creates an empty configuration store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant.
    pub async fn add_tenant(&self, tenant: Tenant) {
        self.inner.write().await.tenants.push(tenant);
    }

    /// Registers an ingress endpoint.
    pub async fn add_endpoint(&self, endpoint: IngressEndpoint) {
        self.inner.write().await.endpoints.push(endpoint);
    }

    /// Registers an integration.
    pub async fn add_integration(&self, integration: Integration) {
        self.inner.write().await.integrations.insert(integration.id, integration);
    }

    /// Registers a field filter.
    pub async fn add_filter(&self, filter: FieldFilter) {
        self.inner.write().await.filters.insert(filter.id, filter);
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let inner = self.inner.read().await;
        Ok(inner.tenants.iter().find(|t| t.slug == slug).cloned())
    }

    async fn endpoint_by_name(&self, name: &str) -> Result<Option<IngressEndpoint>> {
        let inner = self.inner.read().await;
        Ok(inner.endpoints.iter().find(|e| e.name == name).cloned())
    }

    async fn integrations_for(&self, endpoint_id: EndpointId) -> Result<Vec<Integration>> {
        let inner = self.inner.read().await;
        let Some(endpoint) = inner.endpoints.iter().find(|e| e.id == endpoint_id) else {
            return Ok(Vec::new());
        };
        Ok(endpoint
            .integration_ids
            .iter()
            .filter_map(|id| inner.integrations.get(id).cloned())
            .collect())
    }

    async fn field_filter(&self, id: FilterId) -> Result<Option<FieldFilter>> {
        let inner = self.inner.read().await;
        Ok(inner.filters.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, TenantId};

    #[tokio::test]
    async fn resolves_registered_tenant_and_endpoint() {
        let store = MemoryConfigStore::new();
        let tenant = Tenant { id: TenantId::new(), slug: "acme".into(), name: "Acme".into() };
        let endpoint = IngressEndpoint {
            id: EndpointId::new(),
            tenant_id: tenant.id,
            name: "monitoring".into(),
            ip_whitelist: Vec::new(),
            integration_ids: Vec::new(),
        };
        store.add_tenant(tenant.clone()).await;
        store.add_endpoint(endpoint.clone()).await;

        let found = store.tenant_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(found.id, tenant.id);

        let found = store.endpoint_by_name("monitoring").await.unwrap().unwrap();
        assert_eq!(found.id, endpoint.id);

        assert!(store.tenant_by_slug("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn integrations_resolve_in_configuration_order() {
        let store = MemoryConfigStore::new();
        let first = Integration {
            id: IntegrationId::new(),
            name: "discord".into(),
            platform: Platform::Discord,
            webhook_url: "https://discord.example".into(),
            enabled: true,
            field_filter_id: None,
        };
        let second = Integration {
            id: IntegrationId::new(),
            name: "slack".into(),
            platform: Platform::Slack,
            webhook_url: "https://slack.example".into(),
            enabled: false,
            field_filter_id: None,
        };
        let endpoint = IngressEndpoint {
            id: EndpointId::new(),
            tenant_id: TenantId::new(),
            name: "monitoring".into(),
            ip_whitelist: Vec::new(),
            integration_ids: vec![first.id, second.id],
        };
        store.add_integration(first.clone()).await;
        store.add_integration(second.clone()).await;
        store.add_endpoint(endpoint.clone()).await;

        let resolved = store.integrations_for(endpoint.id).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].id, first.id);
        assert_eq!(resolved[1].id, second.id);
    }
}
