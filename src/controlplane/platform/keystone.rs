//! Identity Catalog Adapters
//!
//! [`KeystoneCatalog`] registers services and endpoints through the Keystone v3
//! API using the service token. Lookups come first, so registering the same
//! service twice leaves a single service with one endpoint per interface.
//! [`InMemoryCatalog`] keeps the catalog in a map for dry runs and tests.

use crate::domain::model::IdentitySettings;
use crate::domain::ports::{CatalogRegistrar, CatalogService};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

const AUTH_HEADER: &str = "X-Auth-Token";

// =============================================================================
// Keystone API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ServiceRecord {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    services: Vec<ServiceRecord>,
}

#[derive(Debug, Deserialize)]
struct ServiceCreated {
    service: ServiceRecord,
}

#[derive(Debug, Deserialize)]
struct EndpointRecord {
    url: String,
    #[serde(default)]
    region_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointList {
    endpoints: Vec<EndpointRecord>,
}

/// Keystone v3 root derived from the configured auth URI
fn api_base(auth_uri: &str) -> String {
    let trimmed = auth_uri.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/v3").unwrap_or(trimmed);
    format!("{}/v3", trimmed)
}

fn service_body(service: &CatalogService) -> Value {
    json!({
        "service": {
            "name": service.name,
            "type": service.service_type,
            "description": service.description,
            "enabled": true,
        }
    })
}

fn endpoint_body(service_id: &str, interface: &str, url: &str, region: &str) -> Value {
    json!({
        "endpoint": {
            "service_id": service_id,
            "interface": interface,
            "url": url,
            "region_id": region,
            "enabled": true,
        }
    })
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::CatalogApi {
            status: status.as_u16(),
            reason: body.trim().to_string(),
        });
    }
    Ok(response)
}

// =============================================================================
// Keystone Catalog
// =============================================================================

pub struct KeystoneCatalog {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl KeystoneCatalog {
    /// Build a client for the identity service, trusting its CA when present
    pub async fn connect(identity: &IdentitySettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if identity.ca_cert.exists() {
            let pem = tokio::fs::read(&identity.ca_cert).await?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
            debug!("Trusting identity CA {}", identity.ca_cert.display());
        }

        Ok(Self {
            client: builder.build()?,
            base: api_base(&identity.auth_uri),
            token: identity.admin_token.clone(),
        })
    }

    async fn find_service(&self, service: &CatalogService) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/services", self.base))
            .query(&[("type", service.service_type.as_str())])
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        let list: ServiceList = check(response).await?.json().await?;
        Ok(list
            .services
            .into_iter()
            .find(|s| s.name == service.name)
            .map(|s| s.id))
    }

    async fn create_service(&self, service: &CatalogService) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/services", self.base))
            .header(AUTH_HEADER, &self.token)
            .json(&service_body(service))
            .send()
            .await?;
        let created: ServiceCreated = check(response).await?.json().await?;
        info!("Registered service {} ({})", created.service.name, created.service.id);
        Ok(created.service.id)
    }

    async fn endpoint_exists(
        &self,
        service_id: &str,
        interface: &str,
        url: &str,
        region: &str,
    ) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/endpoints", self.base))
            .query(&[("service_id", service_id), ("interface", interface)])
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        let list: EndpointList = check(response).await?.json().await?;
        Ok(list
            .endpoints
            .iter()
            .any(|e| e.url == url && e.region_id.as_deref().map_or(true, |r| r == region)))
    }
}

#[async_trait]
impl CatalogRegistrar for KeystoneCatalog {
    async fn register(&self, service: &CatalogService) -> Result<()> {
        let service_id = match self.find_service(service).await? {
            Some(id) => id,
            None => self.create_service(service).await?,
        };

        for (interface, url) in service.endpoints.by_interface() {
            if self
                .endpoint_exists(&service_id, interface, url, &service.region)
                .await?
            {
                debug!("{} endpoint for {} already registered", interface, service.name);
                continue;
            }

            let response = self
                .client
                .post(format!("{}/endpoints", self.base))
                .header(AUTH_HEADER, &self.token)
                .json(&endpoint_body(&service_id, interface, url, &service.region))
                .send()
                .await?;
            check(response).await?;
            info!("Registered {} endpoint {} for {}", interface, url, service.name);
        }
        Ok(())
    }
}

// =============================================================================
// In-Memory Catalog
// =============================================================================

/// Catalog kept in memory, keyed by service name
#[derive(Default)]
pub struct InMemoryCatalog {
    services: RwLock<BTreeMap<String, CatalogService>>,
    registrations: RwLock<u32>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn service(&self, name: &str) -> Option<CatalogService> {
        self.services.read().await.get(name).cloned()
    }

    pub async fn service_count(&self) -> usize {
        self.services.read().await.len()
    }

    /// Number of register calls received
    pub async fn registrations(&self) -> u32 {
        *self.registrations.read().await
    }
}

#[async_trait]
impl CatalogRegistrar for InMemoryCatalog {
    async fn register(&self, service: &CatalogService) -> Result<()> {
        info!(
            "Registering {} ({}) at {}",
            service.name, service.service_type, service.endpoints.public
        );
        *self.registrations.write().await += 1;
        self.services
            .write()
            .await
            .insert(service.name.clone(), service.clone());
        Ok(())
    }
}
