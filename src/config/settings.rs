//! Deployment Settings
//!
//! The flat, independently overridable settings surface and its resolution
//! into a validated [`ClusterConfig`].

use crate::domain::model::{
    CatalogBackend, Caps, ClusterConfig, ClusterTopology, Consumer, ConsumerBinding, Credential,
    CredentialRef, GatewayTopology, IdentitySettings, PoolSpec,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Object prefix every RBD client needs read access to
const RBD_CHILDREN: &str = "allow class-read object_prefix rbd_children";

// =============================================================================
// Settings
// =============================================================================

/// Raw deployment settings, one field per environment variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    pub data_dir: PathBuf,
    pub conf_dir: PathBuf,
    pub disk_image: PathBuf,
    /// Backing image size, e.g. `8G`
    pub disk_size: String,
    pub replicas: u32,
    pub rgw_port: u16,

    // Topology switches
    pub remote_ceph: bool,
    pub remote_rgw: bool,
    pub remote_rgw_url: Option<String>,

    // Image store
    pub enable_glance: bool,
    pub glance_pool: String,
    pub glance_pool_pg: u32,
    pub glance_user: String,

    // Compute
    pub enable_nova: bool,
    pub nova_pool: String,
    pub nova_pool_pg: u32,

    // Block store
    pub enable_cinder: bool,
    pub cinder_pool: String,
    pub cinder_pool_pg: u32,
    pub cinder_user: String,
    pub cinder_uuid: Option<Uuid>,

    // Block backups
    pub enable_cinder_backup: bool,
    pub cinder_bak_pool: String,
    pub cinder_bak_pool_pg: u32,
    pub cinder_bak_user: String,

    // Shared filesystem
    pub enable_manila: bool,
    pub manila_user: String,
    pub cephfs_filesystem: String,
    pub cephfs_data_pool: String,
    pub cephfs_metadata_pool: String,
    pub cephfs_pool_pg: u32,

    // Object gateway
    pub enable_rgw: bool,

    // Host and identity
    pub hostname: String,
    pub host_ip: String,
    pub service_host: String,
    pub service_protocol: String,
    pub stack_user: String,
    pub keystone_auth_uri: String,
    pub catalog_backend: String,
    pub service_token: String,
    pub keystone_ca_cert: PathBuf,
    pub region: String,

    // Safety switches
    pub force_install: bool,
    pub confirm_pool_delete: bool,
    pub state_file: PathBuf,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/ceph"),
            conf_dir: PathBuf::from("/etc/ceph"),
            disk_image: PathBuf::from("/var/lib/ceph-drives/ceph.img"),
            disk_size: "8G".to_string(),
            replicas: 1,
            rgw_port: 8080,
            remote_ceph: false,
            remote_rgw: false,
            remote_rgw_url: None,
            enable_glance: true,
            glance_pool: "images".to_string(),
            glance_pool_pg: 8,
            glance_user: "glance".to_string(),
            enable_nova: true,
            nova_pool: "vms".to_string(),
            nova_pool_pg: 8,
            enable_cinder: true,
            cinder_pool: "volumes".to_string(),
            cinder_pool_pg: 8,
            cinder_user: "cinder".to_string(),
            cinder_uuid: None,
            enable_cinder_backup: false,
            cinder_bak_pool: "backups".to_string(),
            cinder_bak_pool_pg: 8,
            cinder_bak_user: "cinder-bak".to_string(),
            enable_manila: false,
            manila_user: "manila".to_string(),
            cephfs_filesystem: "cephfs".to_string(),
            cephfs_data_pool: "cephfs_data".to_string(),
            cephfs_metadata_pool: "cephfs_metadata".to_string(),
            cephfs_pool_pg: 8,
            enable_rgw: false,
            hostname: "localhost".to_string(),
            host_ip: "127.0.0.1".to_string(),
            service_host: "127.0.0.1".to_string(),
            service_protocol: "http".to_string(),
            stack_user: "stack".to_string(),
            keystone_auth_uri: "http://127.0.0.1/identity".to_string(),
            catalog_backend: "sql".to_string(),
            service_token: String::new(),
            keystone_ca_cert: PathBuf::from("/etc/keystone/ssl/certs/ca.pem"),
            region: "RegionOne".to_string(),
            force_install: false,
            confirm_pool_delete: false,
            state_file: PathBuf::from("/var/lib/devstack-ceph/run-state.json"),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

impl ClusterConfig {
    /// Validate settings and derive the cluster topology
    pub fn resolve(settings: &DeploySettings, fsid: Uuid) -> Result<Self> {
        if settings.replicas < 1 {
            return Err(Error::Configuration(
                "CEPH_REPLICAS must be at least 1".to_string(),
            ));
        }

        for (name, pg) in [
            ("GLANCE_CEPH_POOL_PG", settings.glance_pool_pg),
            ("NOVA_CEPH_POOL_PG", settings.nova_pool_pg),
            ("CINDER_CEPH_POOL_PG", settings.cinder_pool_pg),
            ("CINDER_BAK_CEPH_POOL_PG", settings.cinder_bak_pool_pg),
            ("CEPHFS_POOL_PG", settings.cephfs_pool_pg),
        ] {
            if pg == 0 {
                return Err(Error::Configuration(format!("{} must be at least 1", name)));
            }
        }

        let cluster = if settings.remote_ceph {
            ClusterTopology::Remote
        } else {
            ClusterTopology::Embedded
        };

        let gateway = if settings.remote_rgw {
            GatewayTopology::Remote {
                url: settings
                    .remote_rgw_url
                    .clone()
                    .filter(|u| !u.trim().is_empty()),
            }
        } else {
            GatewayTopology::Embedded {
                port: settings.rgw_port,
            }
        };

        if settings.enable_rgw
            && cluster == ClusterTopology::Remote
            && matches!(gateway, GatewayTopology::Embedded { .. })
        {
            return Err(Error::Configuration(
                "a local object gateway requires the embedded cluster; set REMOTE_CEPH_RGW"
                    .to_string(),
            ));
        }

        let catalog_backend = match settings.catalog_backend.to_lowercase().as_str() {
            "sql" => CatalogBackend::Sql,
            "templated" | "template" => CatalogBackend::Templated,
            other => {
                return Err(Error::Configuration(format!(
                    "unknown KEYSTONE_CATALOG_BACKEND: {}",
                    other
                )))
            }
        };

        Ok(Self {
            fsid,
            replicas: settings.replicas,
            hostname: settings.hostname.clone(),
            host_ip: settings.host_ip.clone(),
            data_dir: settings.data_dir.clone(),
            conf_dir: settings.conf_dir.clone(),
            disk_image: settings.disk_image.clone(),
            disk_size_bytes: parse_size(&settings.disk_size)?,
            cluster,
            gateway,
            filesystem: settings.cephfs_filesystem.clone(),
            stack_user: settings.stack_user.clone(),
            identity: IdentitySettings {
                auth_uri: settings.keystone_auth_uri.clone(),
                admin_token: settings.service_token.clone(),
                ca_cert: settings.keystone_ca_cert.clone(),
                catalog_backend,
                service_host: settings.service_host.clone(),
                service_protocol: settings.service_protocol.clone(),
                region: settings.region.clone(),
            },
            bindings: resolve_bindings(settings),
            force_install: settings.force_install,
            confirm_pool_delete: settings.confirm_pool_delete,
        })
    }
}

fn resolve_bindings(s: &DeploySettings) -> Vec<ConsumerBinding> {
    let r = s.replicas;
    let conf = &s.conf_dir;

    let image_read = if s.enable_glance {
        format!(", allow rx pool={}", s.glance_pool)
    } else {
        String::new()
    };

    let mut volumes_osd = format!("{}, allow rwx pool={}", RBD_CHILDREN, s.cinder_pool);
    if s.enable_nova {
        volumes_osd.push_str(&format!(", allow rwx pool={}", s.nova_pool));
    }
    volumes_osd.push_str(&image_read);

    // Compute shares the block-store identity. It only mints it when the block
    // store is not around to do so, and then only with access to its own pool.
    let compute_credential = if s.enable_cinder {
        CredentialRef::Shared {
            owner: Consumer::BlockStore,
            entity: format!("client.{}", s.cinder_user),
        }
    } else {
        let osd = format!("{}, allow rwx pool={}{}", RBD_CHILDREN, s.nova_pool, image_read);
        CredentialRef::Owned(Credential::client(
            &s.cinder_user,
            Caps::new("allow r").osd(osd),
            conf,
        ))
    };

    let gateway_id = format!("radosgw.{}", s.hostname);

    Consumer::ALL
        .iter()
        .map(|&consumer| match consumer {
            Consumer::ImageStore => ConsumerBinding {
                consumer,
                enabled: s.enable_glance,
                pools: vec![PoolSpec::new(&s.glance_pool, s.glance_pool_pg, r)],
                credential: CredentialRef::Owned(Credential::client(
                    &s.glance_user,
                    Caps::new("allow r").osd(format!(
                        "{}, allow rwx pool={}",
                        RBD_CHILDREN, s.glance_pool
                    )),
                    conf,
                )),
            },
            Consumer::BlockStore => ConsumerBinding {
                consumer,
                enabled: s.enable_cinder,
                pools: vec![PoolSpec::new(&s.cinder_pool, s.cinder_pool_pg, r)],
                credential: CredentialRef::Owned(Credential::client(
                    &s.cinder_user,
                    Caps::new("allow r").osd(volumes_osd.clone()),
                    conf,
                )),
            },
            Consumer::BlockBackup => ConsumerBinding {
                consumer,
                enabled: s.enable_cinder_backup,
                pools: vec![PoolSpec::new(&s.cinder_bak_pool, s.cinder_bak_pool_pg, r)],
                credential: CredentialRef::Owned(Credential::client(
                    &s.cinder_bak_user,
                    Caps::new("allow r").osd(format!(
                        "{}, allow rwx pool={}",
                        RBD_CHILDREN, s.cinder_bak_pool
                    )),
                    conf,
                )),
            },
            Consumer::Compute => ConsumerBinding {
                consumer,
                enabled: s.enable_nova,
                pools: vec![PoolSpec::new(&s.nova_pool, s.nova_pool_pg, r)],
                credential: compute_credential.clone(),
            },
            Consumer::SharedFilesystem => ConsumerBinding {
                consumer,
                enabled: s.enable_manila,
                pools: vec![
                    PoolSpec::new(&s.cephfs_data_pool, s.cephfs_pool_pg, r),
                    PoolSpec::new(&s.cephfs_metadata_pool, s.cephfs_pool_pg, r),
                ],
                credential: CredentialRef::Owned(Credential::client(
                    &s.manila_user,
                    Caps::new(
                        "allow r, allow command \"auth del\", allow command \"auth caps\", \
                         allow command \"auth get\", allow command \"auth get-or-create\"",
                    )
                    .osd("allow rw")
                    .mds("allow *"),
                    conf,
                )),
            },
            Consumer::ObjectGateway => ConsumerBinding {
                consumer,
                enabled: s.enable_rgw,
                pools: Vec::new(),
                credential: CredentialRef::Owned(Credential {
                    entity: format!("client.{}", gateway_id),
                    caps: Caps::new("allow rw").osd("allow rwx"),
                    keyring: s
                        .data_dir
                        .join("radosgw")
                        .join(format!("ceph-{}", gateway_id))
                        .join("keyring"),
                }),
            },
        })
        .collect()
}

/// Parse a size like `8G`, `512M` or a plain byte count
pub fn parse_size(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let multiplier = match c.to_ascii_uppercase() {
                'K' => 1u64 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                'T' => 1 << 40,
                _ => {
                    return Err(Error::Configuration(format!("invalid size unit in {}", raw)))
                }
            };
            (&trimmed[..idx], multiplier)
        }
        _ => (trimmed, 1),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid size: {}", raw)))?;

    value
        .checked_mul(multiplier)
        .filter(|bytes| *bytes > 0)
        .ok_or_else(|| Error::Configuration(format!("invalid size: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn resolve(settings: DeploySettings) -> ClusterConfig {
        ClusterConfig::resolve(&settings, Uuid::new_v4()).unwrap()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("8G").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("8X").is_err());
        assert!(parse_size("0G").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_rejects_zero_replicas() {
        let settings = DeploySettings {
            replicas: 0,
            ..Default::default()
        };
        assert_matches!(
            ClusterConfig::resolve(&settings, Uuid::new_v4()),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_pool_size_follows_replicas() {
        let config = resolve(DeploySettings {
            replicas: 3,
            enable_manila: true,
            enable_cinder_backup: true,
            ..Default::default()
        });
        for binding in &config.bindings {
            for pool in &binding.pools {
                assert_eq!(pool.size, 3, "pool {} has wrong size", pool.name);
            }
        }
    }

    #[test]
    fn test_compute_reuses_block_store_identity() {
        let config = resolve(DeploySettings::default());
        let compute = config.binding(Consumer::Compute).unwrap();
        assert_matches!(
            &compute.credential,
            CredentialRef::Shared { owner: Consumer::BlockStore, entity } if entity == "client.cinder"
        );

        let block = config.binding(Consumer::BlockStore).unwrap();
        let CredentialRef::Owned(cred) = &block.credential else {
            panic!("block store must own its credential");
        };
        let osd = cred.caps.osd.as_deref().unwrap();
        assert!(osd.contains("allow rwx pool=volumes"));
        assert!(osd.contains("allow rwx pool=vms"));
        assert!(osd.contains("allow rx pool=images"));
    }

    #[test]
    fn test_compute_mints_identity_without_block_store() {
        let config = resolve(DeploySettings {
            enable_cinder: false,
            ..Default::default()
        });
        let compute = config.binding(Consumer::Compute).unwrap();
        let CredentialRef::Owned(cred) = &compute.credential else {
            panic!("compute must mint the identity when the block store is disabled");
        };
        assert_eq!(cred.entity, "client.cinder");
        let osd = cred.caps.osd.as_deref().unwrap();
        assert!(osd.contains("allow rwx pool=vms"));
        assert!(!osd.contains("pool=volumes"));
    }

    #[test]
    fn test_block_store_caps_are_minimal() {
        let config = resolve(DeploySettings {
            enable_nova: false,
            enable_glance: false,
            ..Default::default()
        });
        let block = config.binding(Consumer::BlockStore).unwrap();
        let CredentialRef::Owned(cred) = &block.credential else {
            panic!("block store must own its credential");
        };
        assert_eq!(
            cred.caps.osd.as_deref(),
            Some("allow class-read object_prefix rbd_children, allow rwx pool=volumes")
        );
    }

    #[test]
    fn test_gateway_topologies() {
        let config = resolve(DeploySettings {
            enable_rgw: true,
            remote_rgw: true,
            remote_rgw_url: Some("  ".to_string()),
            ..Default::default()
        });
        assert_eq!(config.gateway, GatewayTopology::Remote { url: None });
        assert!(!config.runs_local_gateway());

        let settings = DeploySettings {
            enable_rgw: true,
            remote_ceph: true,
            ..Default::default()
        };
        assert_matches!(
            ClusterConfig::resolve(&settings, Uuid::new_v4()),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_unknown_catalog_backend() {
        let settings = DeploySettings {
            catalog_backend: "ldap".to_string(),
            ..Default::default()
        };
        assert_matches!(
            ClusterConfig::resolve(&settings, Uuid::new_v4()),
            Err(Error::Configuration(_))
        );
    }
}
