//! Teardown Coordinator
//!
//! Reverses provisioning. On a remote cluster only what this run created is
//! removed, pool by pool, and only with explicit confirmation. An embedded
//! cluster is destroyed outright: daemons, mount, backing image and both
//! directory trees.

use crate::controlplane::context::RunContext;
use crate::controlplane::gateway;
use crate::domain::model::{ClusterConfig, Consumer, CredentialRef, GatewayTopology};
use crate::domain::ports::{ClusterAdminRef, HostAdapterRef, HostCommand, PoolDeletion, SecretStoreRef};
use crate::error::{Error, Result};
use crate::host::{Daemon, ServiceSupervisor};
use std::path::Path;
use tracing::{debug, info, warn};

/// Which teardown path ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStrategy {
    Remote,
    Embedded,
}

/// What teardown removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub strategy: CleanupStrategy,
    pub pools_deleted: Vec<String>,
    pub credentials_deleted: Vec<String>,
    pub paths_removed: usize,
    pub secret_removed: bool,
}

pub struct TeardownCoordinator {
    admin: ClusterAdminRef,
    host: HostAdapterRef,
    secrets: SecretStoreRef,
}

impl TeardownCoordinator {
    pub fn new(admin: ClusterAdminRef, host: HostAdapterRef, secrets: SecretStoreRef) -> Self {
        Self {
            admin,
            host,
            secrets,
        }
    }

    pub async fn cleanup(
        &self,
        config: &ClusterConfig,
        ctx: &RunContext,
        supervisor: &ServiceSupervisor,
    ) -> Result<TeardownReport> {
        let mut report = if config.is_embedded() {
            self.destroy_embedded(config, ctx, supervisor).await?
        } else {
            self.remove_remote_resources(config).await?
        };

        if config.needs_hypervisor_secret() {
            if let Some(uuid) = ctx.hypervisor_secret {
                match self.secrets.undefine_secret(uuid).await {
                    Ok(()) => report.secret_removed = true,
                    Err(e) => warn!("Ignoring failure to remove hypervisor secret {}: {}", uuid, e),
                }
            }
        }

        info!(
            "Cleanup finished: {} pool(s), {} credential(s), {} path(s) removed",
            report.pools_deleted.len(),
            report.credentials_deleted.len(),
            report.paths_removed
        );
        Ok(report)
    }

    /// Delete the pools and identities enabled consumers created
    async fn remove_remote_resources(&self, config: &ClusterConfig) -> Result<TeardownReport> {
        if !config.confirm_pool_delete {
            return Err(Error::DeletionNotConfirmed);
        }

        let existing = self.admin.list_pools().await?;
        let doomed: Vec<&str> = config
            .enabled_bindings()
            .flat_map(|b| b.pools.iter())
            .map(|p| p.name.as_str())
            .filter(|name| existing.iter().any(|e| e.as_str() == *name))
            .collect();

        let mut pools_deleted = Vec::new();
        for pool in doomed {
            if pools_deleted.iter().any(|p: &String| p == pool) {
                continue;
            }
            info!("Deleting pool {}", pool);
            self.admin.pool_delete(&PoolDeletion::confirmed(pool)).await?;
            pools_deleted.push(pool.to_string());
        }

        let mut credentials_deleted: Vec<String> = Vec::new();
        for binding in config.enabled_bindings() {
            let CredentialRef::Owned(credential) = &binding.credential else {
                continue;
            };
            if binding.consumer == Consumer::ObjectGateway
                && matches!(config.gateway, GatewayTopology::Remote { .. })
            {
                continue;
            }
            if credentials_deleted.contains(&credential.entity) {
                continue;
            }

            info!("Deleting identity {}", credential.entity);
            self.admin.auth_del(&credential.entity).await?;
            remove_file_if_present(&credential.keyring).await?;
            credentials_deleted.push(credential.entity.clone());
        }

        Ok(TeardownReport {
            strategy: CleanupStrategy::Remote,
            pools_deleted,
            credentials_deleted,
            paths_removed: 0,
            secret_removed: false,
        })
    }

    /// Stop everything and delete every trace of the local cluster
    async fn destroy_embedded(
        &self,
        config: &ClusterConfig,
        ctx: &RunContext,
        supervisor: &ServiceSupervisor,
    ) -> Result<TeardownReport> {
        let mut daemons = vec![Daemon::Monitor(config.hostname.clone())];
        daemons.extend(ctx.osd_ids.iter().map(|&id| Daemon::Osd(id)));
        if ctx.osd_ids.is_empty() {
            // kill matches by process name; the id is irrelevant
            daemons.push(Daemon::Osd(0));
        }
        if config.is_enabled(Consumer::SharedFilesystem) {
            daemons.push(Daemon::Metadata(config.hostname.clone()));
        }
        if config.runs_local_gateway() {
            daemons.push(Daemon::Gateway(gateway::instance_name(config)));
        }
        supervisor.kill(&daemons).await;

        if self.host.is_mounted(&config.data_dir).await? {
            self.host
                .run_best_effort(&HostCommand::sudo("umount").path_arg(&config.data_dir))
                .await;
        }

        let mut paths_removed = 0;
        if remove_file_if_present(&config.disk_image).await? {
            paths_removed += 1;
        }

        match tokio::fs::remove_dir_all(&config.data_dir).await {
            Ok(()) => paths_removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        paths_removed += purge_directory(&config.conf_dir).await?;

        Ok(TeardownReport {
            strategy: CleanupStrategy::Embedded,
            pools_deleted: Vec::new(),
            credentials_deleted: Vec::new(),
            paths_removed,
            secret_removed: false,
        })
    }
}

async fn remove_file_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove everything inside `dir`, keeping the directory itself
async fn purge_directory(dir: &Path) -> Result<usize> {
    let pattern = dir.join("*");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::Configuration(format!("bad cleanup pattern {}: {}", pattern, e)))?;

    let mut removed = 0;
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let metadata = tokio::fs::symlink_metadata(&path).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        removed += 1;
    }
    Ok(removed)
}
