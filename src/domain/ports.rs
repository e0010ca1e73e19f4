//! Domain Ports - Trait definitions for the systems the orchestrator drives
//!
//! The storage daemons, the host's process supervisor, the identity catalog and
//! the hypervisor are all external. The orchestrator talks to them only through
//! these traits so that every phase can run against the in-memory cluster and a
//! command recorder in tests.

use crate::domain::model::{Caps, CephVersion, CrushRule};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

// =============================================================================
// Host Commands
// =============================================================================

/// A command to run on the control host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Run through `sudo`
    pub privileged: bool,
    /// Positions in `args` masked when the command is displayed
    #[serde(default)]
    pub secret_args: Vec<usize>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            secret_args: Vec::new(),
        }
    }

    /// Command that must run with elevated privilege
    pub fn sudo(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Argument that never appears in logs or errors
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.arg(arg)
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Shell-like rendering for logs and errors
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        if self.privileged {
            parts.push("sudo".to_string());
        }
        parts.push(self.program.clone());
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                parts.push("<redacted>".to_string());
            } else if arg.contains(' ') || arg.is_empty() {
                parts.push(format!("'{}'", arg));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Port for running commands on the control host
#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Run a command; a non-zero exit is an error. Returns stdout.
    async fn run(&self, command: &HostCommand) -> Result<String>;

    /// Run a command whose failure is expected and ignored
    async fn run_best_effort(&self, command: &HostCommand) -> bool {
        match self.run(command).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Ignoring failure of {}: {}", command.display(), e);
                false
            }
        }
    }

    /// Whether a filesystem is mounted at `path`
    async fn is_mounted(&self, path: &Path) -> Result<bool>;
}

// =============================================================================
// Cluster Administration Port
// =============================================================================

/// Everything needed to create the first monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorBootstrap {
    pub mon_id: String,
    pub fsid: Uuid,
    pub mon_dir: PathBuf,
    pub mon_keyring: PathBuf,
    pub conf_file: PathBuf,
    /// Where the cluster writes the admin keyring once in quorum
    pub admin_keyring: PathBuf,
}

/// Explicit double confirmation for destroying a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDeletion {
    pub pool: String,
    pub pool_again: String,
}

impl PoolDeletion {
    pub const MARKER: &'static str = "--yes-i-really-really-mean-it";

    pub fn confirmed(pool: &str) -> Self {
        Self {
            pool: pool.to_string(),
            pool_again: pool.to_string(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.pool == self.pool_again
    }
}

/// Port for the cluster's administrative command interface
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Version reported by the administrative client tool
    async fn client_version(&self) -> Result<CephVersion>;

    /// Version reported by the running monitor daemon
    async fn daemon_version(&self, mon_id: &str) -> Result<CephVersion>;

    /// Create the monitor store and keyring
    async fn bootstrap_monitor(&self, request: &MonitorBootstrap) -> Result<()>;

    async fn list_pools(&self) -> Result<Vec<String>>;

    async fn pool_create(&self, pool: &str, pg_num: u32) -> Result<()>;

    async fn pool_set(&self, pool: &str, key: &str, value: &str) -> Result<()>;

    async fn pool_delete(&self, deletion: &PoolDeletion) -> Result<()>;

    /// Returns the keyring text for the entity
    async fn auth_get_or_create(&self, entity: &str, caps: &Caps) -> Result<String>;

    /// Returns the bare secret key for the entity
    async fn auth_get_key(&self, entity: &str) -> Result<String>;

    async fn auth_del(&self, entity: &str) -> Result<()>;

    async fn crush_rule_create_simple(&self, name: &str, root: &str, failure_domain: &str)
        -> Result<()>;

    async fn crush_rule_dump(&self, name: &str) -> Result<CrushRule>;

    async fn fs_list(&self) -> Result<Vec<String>>;

    async fn fs_new(&self, fs: &str, metadata_pool: &str, data_pool: &str) -> Result<()>;

    /// Enable metadata snapshots on a filesystem
    async fn allow_new_snaps(&self, fs: &str) -> Result<()>;

    async fn osd_ls(&self) -> Result<Vec<u32>>;

    /// Allocate a new OSD id
    async fn osd_create(&self) -> Result<u32>;

    /// Initialize an OSD data directory
    async fn osd_mkfs(&self, id: u32, data_dir: &Path) -> Result<()>;

    /// Backend name
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Identity Catalog Port
// =============================================================================

/// The three endpoint variants registered for a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointUrls {
    pub public: String,
    pub internal: String,
    pub admin: String,
}

impl EndpointUrls {
    /// Same URL on every interface
    pub fn uniform(url: &str) -> Self {
        Self {
            public: url.to_string(),
            internal: url.to_string(),
            admin: url.to_string(),
        }
    }

    pub fn by_interface(&self) -> [(&'static str, &str); 3] {
        [
            ("public", self.public.as_str()),
            ("internal", self.internal.as_str()),
            ("admin", self.admin.as_str()),
        ]
    }
}

/// A service entry in the identity catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    pub name: String,
    pub service_type: String,
    pub description: String,
    pub region: String,
    pub endpoints: EndpointUrls,
}

/// Port for the identity service catalog
#[async_trait]
pub trait CatalogRegistrar: Send + Sync {
    /// Register the service and its endpoints, reusing any that already exist
    async fn register(&self, service: &CatalogService) -> Result<()>;
}

// =============================================================================
// Hypervisor Secret Port
// =============================================================================

/// Port for secrets the hypervisor uses to authenticate to the cluster
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn define_secret(&self, uuid: Uuid, entity: &str, key: &str) -> Result<()>;

    async fn undefine_secret(&self, uuid: Uuid) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type HostAdapterRef = Arc<dyn HostAdapter>;
pub type ClusterAdminRef = Arc<dyn ClusterAdmin>;
pub type CatalogRegistrarRef = Arc<dyn CatalogRegistrar>;
pub type SecretStoreRef = Arc<dyn SecretStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_command_display() {
        let cmd = HostCommand::sudo("ceph")
            .args(["auth", "get-or-create", "client.glance"])
            .arg("allow r");
        assert_eq!(cmd.display(), "sudo ceph auth get-or-create client.glance 'allow r'");

        let cmd = HostCommand::new("virsh").arg("secret-list");
        assert_eq!(cmd.display(), "virsh secret-list");
    }

    #[test]
    fn test_pool_deletion_confirmation() {
        let deletion = PoolDeletion::confirmed("images");
        assert!(deletion.is_consistent());
        assert_eq!(deletion.pool_again, "images");
    }

    #[test]
    fn test_uniform_endpoints() {
        let urls = EndpointUrls::uniform("http://rgw.example:8080/swift/v1");
        for (_, url) in urls.by_interface() {
            assert_eq!(url, "http://rgw.example:8080/swift/v1");
        }
    }
}
