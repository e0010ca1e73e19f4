//! Hypervisor Secret Adapter
//!
//! Stores the block-store key in libvirt so the hypervisor can attach cluster
//! volumes. Uses `virsh secret-define` with a generated XML document followed
//! by `virsh secret-set-value`.

use crate::domain::ports::{HostAdapterRef, HostCommand, SecretStore};
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Secret definition for a cluster identity
pub fn secret_xml(uuid: Uuid, entity: &str) -> String {
    format!(
        "<secret ephemeral='no' private='no'>\n  \
         <uuid>{}</uuid>\n  \
         <usage type='ceph'>\n    \
         <name>{} secret</name>\n  \
         </usage>\n\
         </secret>\n",
        uuid, entity
    )
}

pub struct VirshSecrets {
    host: HostAdapterRef,
    scratch_dir: PathBuf,
}

impl VirshSecrets {
    /// `scratch_dir` holds the XML document while it is being defined
    pub fn new(host: HostAdapterRef, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            host,
            scratch_dir: scratch_dir.into(),
        }
    }

    async fn is_defined(&self, uuid: Uuid) -> Result<bool> {
        let out = self
            .host
            .run(&HostCommand::sudo("virsh").arg("secret-list"))
            .await?;
        let wanted = uuid.to_string();
        Ok(out
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|id| id == wanted))
    }
}

#[async_trait]
impl SecretStore for VirshSecrets {
    async fn define_secret(&self, uuid: Uuid, entity: &str, key: &str) -> Result<()> {
        if self.is_defined(uuid).await? {
            debug!("Hypervisor secret {} already defined", uuid);
        } else {
            tokio::fs::create_dir_all(&self.scratch_dir).await?;
            let xml_path = self.scratch_dir.join(format!("secret-{}.xml", uuid));
            tokio::fs::write(&xml_path, secret_xml(uuid, entity)).await?;

            let defined = self
                .host
                .run(
                    &HostCommand::sudo("virsh")
                        .arg("secret-define")
                        .arg("--file")
                        .path_arg(&xml_path),
                )
                .await;
            if let Err(e) = tokio::fs::remove_file(&xml_path).await {
                warn!("Ignoring failure to remove {}: {}", xml_path.display(), e);
            }
            defined?;
            info!("Defined hypervisor secret {} for {}", uuid, entity);
        }

        self.host
            .run(
                &HostCommand::sudo("virsh")
                    .args(["secret-set-value", "--secret"])
                    .arg(uuid.to_string())
                    .arg("--base64")
                    .secret_arg(key),
            )
            .await?;
        Ok(())
    }

    async fn undefine_secret(&self, uuid: Uuid) -> Result<()> {
        self.host
            .run(&HostCommand::sudo("virsh").arg("secret-undefine").arg(uuid.to_string()))
            .await?;
        info!("Removed hypervisor secret {}", uuid);
        Ok(())
    }
}
