//! Object Gateway Provisioning
//!
//! A local gateway gets its data directory, supervisor markers and the
//! identity service's CA in its certificate store. Either topology ends with
//! the gateway registered in the identity catalog, unless the catalog is
//! templated.

use crate::domain::model::{CatalogBackend, ClusterConfig, GatewayTopology};
use crate::domain::ports::{CatalogRegistrarRef, CatalogService, EndpointUrls, HostAdapterRef, HostCommand};
use crate::error::{Error, Result};
use crate::host::ServiceSupervisor;
use std::path::PathBuf;
use tracing::{info, warn};

/// Gateway instance name, e.g. `radosgw.node1`
pub fn instance_name(config: &ClusterConfig) -> String {
    format!("radosgw.{}", config.hostname)
}

/// Data directory of the local gateway instance
pub fn instance_dir(config: &ClusterConfig) -> PathBuf {
    config
        .data_dir
        .join("radosgw")
        .join(format!("ceph-{}", instance_name(config)))
}

/// Certificate store the gateway uses to validate identity tokens
pub fn nss_dir(config: &ClusterConfig) -> PathBuf {
    config.data_dir.join("nss")
}

/// Catalog entry for a local gateway
pub fn local_endpoints(config: &ClusterConfig, port: u16) -> EndpointUrls {
    EndpointUrls::uniform(&format!(
        "{}://{}:{}/swift/v1",
        config.identity.service_protocol, config.identity.service_host, port
    ))
}

fn catalog_entry(config: &ClusterConfig, endpoints: EndpointUrls) -> CatalogService {
    CatalogService {
        name: "swift".to_string(),
        service_type: "object-store".to_string(),
        description: "Swift Service".to_string(),
        region: config.identity.region.clone(),
        endpoints,
    }
}

pub struct GatewayProvisioner {
    host: HostAdapterRef,
    catalog: CatalogRegistrarRef,
}

impl GatewayProvisioner {
    pub fn new(host: HostAdapterRef, catalog: CatalogRegistrarRef) -> Self {
        Self { host, catalog }
    }

    /// Prepare the gateway and register it. Returns the catalog entry when
    /// one was registered.
    pub async fn provision(
        &self,
        config: &ClusterConfig,
        supervisor: &ServiceSupervisor,
    ) -> Result<Option<CatalogService>> {
        let endpoints = match &config.gateway {
            GatewayTopology::Embedded { port } => {
                let dir = instance_dir(config);
                tokio::fs::create_dir_all(&dir).await?;
                supervisor.write_markers(&dir).await?;
                self.import_trust_anchor(config).await?;
                local_endpoints(config, *port)
            }
            GatewayTopology::Remote { url } => {
                let url = url.as_deref().ok_or(Error::MissingGatewayUrl)?;
                info!("Using remote object gateway at {}", url);
                EndpointUrls::uniform(url)
            }
        };

        if config.identity.catalog_backend != CatalogBackend::Sql {
            info!("Catalog is templated; not registering the object gateway");
            return Ok(None);
        }

        let entry = catalog_entry(config, endpoints);
        self.catalog.register(&entry).await?;
        Ok(Some(entry))
    }

    /// Put the identity CA into the gateway's certificate store
    async fn import_trust_anchor(&self, config: &ClusterConfig) -> Result<()> {
        let ca = &config.identity.ca_cert;
        if !ca.exists() {
            warn!(
                "Identity CA {} not found; gateway will not validate tokens over TLS",
                ca.display()
            );
            return Ok(());
        }

        let nss = nss_dir(config);
        tokio::fs::create_dir_all(&nss).await?;
        if !nss.join("cert8.db").exists() && !nss.join("cert9.db").exists() {
            self.host
                .run(
                    &HostCommand::sudo("certutil")
                        .arg("-N")
                        .arg("-d")
                        .path_arg(&nss)
                        .arg("--empty-password"),
                )
                .await?;
        }

        self.host
            .run(
                &HostCommand::sudo("certutil")
                    .arg("-d")
                    .path_arg(&nss)
                    .args(["-A", "-n", "ca", "-t", "TCu,Cu,Tuw", "-i"])
                    .path_arg(ca),
            )
            .await?;
        info!("Imported {} into {}", ca.display(), nss.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploySettings;
    use crate::controlplane::platform::InMemoryCatalog;
    use crate::host::{DryRunHost, InitSystem};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use uuid::Uuid;

    fn settings(dir: &std::path::Path) -> DeploySettings {
        DeploySettings {
            data_dir: dir.join("data"),
            conf_dir: dir.join("etc"),
            hostname: "node1".into(),
            service_host: "10.0.0.5".into(),
            service_protocol: "http".into(),
            keystone_ca_cert: dir.join("ca.pem"),
            enable_rgw: true,
            ..Default::default()
        }
    }

    struct Fixture {
        host: Arc<DryRunHost>,
        catalog: Arc<InMemoryCatalog>,
        gateway: GatewayProvisioner,
        supervisor: ServiceSupervisor,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(DryRunHost::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        Fixture {
            gateway: GatewayProvisioner::new(host.clone(), catalog.clone()),
            supervisor: ServiceSupervisor::new(host.clone(), InitSystem::Systemd),
            host,
            catalog,
        }
    }

    #[tokio::test]
    async fn test_local_gateway_registers_three_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ClusterConfig::resolve(&settings(dir.path()), Uuid::new_v4()).unwrap();
        let f = fixture();

        let entry = f.gateway.provision(&cfg, &f.supervisor).await.unwrap().unwrap();
        for (_, url) in entry.endpoints.by_interface() {
            assert_eq!(url, "http://10.0.0.5:8080/swift/v1");
        }
        assert_eq!(f.catalog.service("swift").await.unwrap().service_type, "object-store");
        assert!(instance_dir(&cfg).join("done").exists());
        assert!(instance_dir(&cfg).join("systemd").exists());
        // No CA on disk
        assert!(!f.host.ran("certutil"));
    }

    #[tokio::test]
    async fn test_trust_anchor_import() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.pem"), b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let cfg = ClusterConfig::resolve(&settings(dir.path()), Uuid::new_v4()).unwrap();
        let f = fixture();

        f.gateway.provision(&cfg, &f.supervisor).await.unwrap();
        assert!(f.host.ran("certutil -N -d"));
        assert!(f.host.ran(&format!(
            "certutil -d {} -A -n ca -t TCu,Cu,Tuw -i {}",
            nss_dir(&cfg).display(),
            dir.path().join("ca.pem").display()
        )));
    }

    #[tokio::test]
    async fn test_remote_gateway_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.remote_rgw = true;
        s.remote_rgw_url = None;
        let cfg = ClusterConfig::resolve(&s, Uuid::new_v4()).unwrap();
        let f = fixture();

        assert_matches!(
            f.gateway.provision(&cfg, &f.supervisor).await,
            Err(Error::MissingGatewayUrl)
        );
        assert_eq!(f.catalog.registrations().await, 0);
    }

    #[tokio::test]
    async fn test_remote_gateway_uses_given_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.remote_rgw = true;
        s.remote_rgw_url = Some("https://rgw.example.com/swift/v1".into());
        let cfg = ClusterConfig::resolve(&s, Uuid::new_v4()).unwrap();
        let f = fixture();

        let entry = f.gateway.provision(&cfg, &f.supervisor).await.unwrap().unwrap();
        assert_eq!(entry.endpoints, EndpointUrls::uniform("https://rgw.example.com/swift/v1"));
        assert!(!instance_dir(&cfg).exists());
    }

    #[tokio::test]
    async fn test_templated_catalog_skips_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.catalog_backend = "templated".into();
        let cfg = ClusterConfig::resolve(&s, Uuid::new_v4()).unwrap();
        let f = fixture();

        assert!(f.gateway.provision(&cfg, &f.supervisor).await.unwrap().is_none());
        assert_eq!(f.catalog.registrations().await, 0);
    }
}
