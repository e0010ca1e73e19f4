//! Consumer Provisioner
//!
//! Gives every enabled consumer its pools and its capability-scoped identity.
//! All calls are safe to repeat: pools are created only when absent, and
//! identities go through get-or-create so a rerun returns the same keyring.

use crate::controlplane::context::RunContext;
use crate::domain::model::{
    ClusterConfig, Consumer, ConsumerBinding, Credential, CredentialRef, CrushRule, GatewayTopology,
    PoolSpec, CRUSH_RULE_NAME,
};
use crate::domain::ports::{ClusterAdminRef, HostAdapterRef, SecretStoreRef};
use crate::error::Result;
use crate::host;
use tracing::{debug, info};

/// What provisioning did for one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub consumer: Consumer,
    pub pools: Vec<PoolSpec>,
    pub pools_created: Vec<String>,
    /// Entity minted by this consumer
    pub minted: Option<String>,
    /// Entity reused from another consumer
    pub reused: Option<String>,
}

pub struct ConsumerProvisioner {
    admin: ClusterAdminRef,
    host: HostAdapterRef,
}

impl ConsumerProvisioner {
    pub fn new(admin: ClusterAdminRef, host: HostAdapterRef) -> Self {
        Self { admin, host }
    }

    /// Create the shared placement rule when replicas != 1 and record it.
    /// Single-replica clusters never get one.
    pub async fn ensure_crush_rule(&self, config: &ClusterConfig, ctx: RunContext) -> Result<RunContext> {
        if config.replicas == 1 {
            return Ok(ctx);
        }
        if let Some(rule) = &ctx.crush_rule {
            debug!("Placement rule {} (id {}) already recorded", rule.name, rule.id);
            return Ok(ctx);
        }

        self.admin
            .crush_rule_create_simple(CRUSH_RULE_NAME, "default", "osd")
            .await?;
        let rule = self.admin.crush_rule_dump(CRUSH_RULE_NAME).await?;
        info!("Placement rule {} has id {}", rule.name, rule.id);
        Ok(ctx.with_crush_rule(rule))
    }

    /// Resize pools the cluster created on its own. Pools the release does
    /// not ship are skipped.
    pub async fn configure_default_pools(
        &self,
        pools: &[&str],
        replicas: u32,
        rule: Option<&CrushRule>,
    ) -> Result<()> {
        let existing = self.admin.list_pools().await?;
        for name in pools {
            if !existing.iter().any(|p| p.as_str() == *name) {
                debug!("Default pool {} not present", name);
                continue;
            }
            self.apply_attributes(name, replicas, rule).await?;
        }
        Ok(())
    }

    /// Create the pool if absent, then set its size and placement rule.
    /// Returns whether the pool was created.
    pub async fn apply_pool(&self, pool: &PoolSpec, existing: &[String]) -> Result<bool> {
        let created = if existing.iter().any(|p| *p == pool.name) {
            false
        } else {
            info!("Creating pool {} ({} placement groups)", pool.name, pool.pg_num);
            self.admin.pool_create(&pool.name, pool.pg_num).await?;
            true
        };
        self.apply_attributes(&pool.name, pool.size, pool.crush_rule.as_ref())
            .await?;
        Ok(created)
    }

    async fn apply_attributes(&self, pool: &str, size: u32, rule: Option<&CrushRule>) -> Result<()> {
        self.admin.pool_set(pool, "size", &size.to_string()).await?;
        if let Some(rule) = rule {
            self.admin
                .pool_set(pool, "crush_ruleset", &rule.id.to_string())
                .await?;
        }
        Ok(())
    }

    /// Mint a credential and persist its keyring, handing it to `owner` when given
    pub async fn mint(&self, credential: &Credential, owner: Option<&str>) -> Result<()> {
        let keyring = self
            .admin
            .auth_get_or_create(&credential.entity, &credential.caps)
            .await?;

        if let Some(parent) = credential.keyring.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&credential.keyring, keyring).await?;
        if let Some(owner) = owner {
            host::chown(self.host.as_ref(), &credential.keyring, owner).await?;
        }
        info!("Keyring for {} at {}", credential.entity, credential.keyring.display());
        Ok(())
    }

    /// Provision one consumer
    pub async fn provision(
        &self,
        config: &ClusterConfig,
        binding: &ConsumerBinding,
        rule: Option<&CrushRule>,
    ) -> Result<ConsumerReport> {
        info!("Provisioning {}", binding.consumer);

        let existing = self.admin.list_pools().await?;
        let pools: Vec<PoolSpec> = binding
            .pools
            .iter()
            .map(|p| p.clone().with_rule(rule))
            .collect();

        let mut pools_created = Vec::new();
        for pool in &pools {
            if self.apply_pool(pool, &existing).await? {
                pools_created.push(pool.name.clone());
            }
        }

        if binding.consumer == Consumer::SharedFilesystem {
            self.ensure_filesystem(config, &pools).await?;
        }

        let (minted, reused) = match &binding.credential {
            CredentialRef::Owned(credential) => {
                if binding.consumer == Consumer::ObjectGateway
                    && matches!(config.gateway, GatewayTopology::Remote { .. })
                {
                    // Remote gateway brings its own identity
                    (None, None)
                } else {
                    let owner = (binding.consumer != Consumer::ObjectGateway)
                        .then_some(config.stack_user.as_str());
                    self.mint(credential, owner).await?;
                    (Some(credential.entity.clone()), None)
                }
            }
            CredentialRef::Shared { owner, entity } => {
                debug!("{} reuses {} from {}", binding.consumer, entity, owner);
                (None, Some(entity.clone()))
            }
        };

        Ok(ConsumerReport {
            consumer: binding.consumer,
            pools,
            pools_created,
            minted,
            reused,
        })
    }

    async fn ensure_filesystem(&self, config: &ClusterConfig, pools: &[PoolSpec]) -> Result<()> {
        let (data, metadata) = match pools {
            [data, metadata, ..] => (data, metadata),
            _ => return Ok(()),
        };

        let existing = self.admin.fs_list().await?;
        if !existing.iter().any(|fs| *fs == config.filesystem) {
            info!(
                "Creating filesystem {} (metadata {}, data {})",
                config.filesystem, metadata.name, data.name
            );
            self.admin
                .fs_new(&config.filesystem, &metadata.name, &data.name)
                .await?;
        }
        self.admin.allow_new_snaps(&config.filesystem).await
    }

    /// Provision every enabled consumer in order
    pub async fn provision_all(
        &self,
        config: &ClusterConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ConsumerReport>> {
        let mut reports = Vec::new();
        for binding in config.enabled_bindings() {
            reports.push(self.provision(config, binding, ctx.crush_rule.as_ref()).await?);
        }
        Ok(reports)
    }

    /// Store the key the hypervisor uses to attach volumes
    pub async fn import_hypervisor_secret(
        &self,
        config: &ClusterConfig,
        ctx: &RunContext,
        secrets: &SecretStoreRef,
    ) -> Result<()> {
        if !config.needs_hypervisor_secret() {
            return Ok(());
        }
        let Some(uuid) = ctx.hypervisor_secret else {
            return Ok(());
        };

        let binding = config
            .binding(Consumer::BlockStore)
            .filter(|b| b.enabled)
            .or_else(|| config.binding(Consumer::Compute));
        let Some(binding) = binding else {
            return Ok(());
        };

        let entity = binding.credential.entity();
        let key = self.admin.auth_get_key(entity).await?;
        secrets.define_secret(uuid, entity, &key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploySettings;
    use crate::controlplane::backends::{SimulatedCluster, SimulatedConfig};
    use crate::controlplane::platform::VirshSecrets;
    use crate::domain::ports::ClusterAdmin;
    use crate::host::DryRunHost;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        _dir: tempfile::TempDir,
        cluster: Arc<SimulatedCluster>,
        host: Arc<DryRunHost>,
        provisioner: ConsumerProvisioner,
        settings: DeploySettings,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(SimulatedCluster::new(SimulatedConfig::default()));
        let host = Arc::new(DryRunHost::new());
        let settings = DeploySettings {
            data_dir: dir.path().join("data"),
            conf_dir: dir.path().join("etc"),
            hostname: "node1".into(),
            stack_user: "stack".into(),
            ..Default::default()
        };
        Fixture {
            provisioner: ConsumerProvisioner::new(cluster.clone(), host.clone()),
            _dir: dir,
            cluster,
            host,
            settings,
        }
    }

    fn config(settings: &DeploySettings) -> ClusterConfig {
        ClusterConfig::resolve(settings, Uuid::new_v4()).unwrap()
    }

    #[tokio::test]
    async fn test_single_replica_never_creates_rule() {
        let f = fixture();
        let cfg = config(&f.settings);
        let ctx = f
            .provisioner
            .ensure_crush_rule(&cfg, RunContext::new(None))
            .await
            .unwrap();
        assert!(ctx.crush_rule.is_none());
        assert_eq!(f.cluster.rule_count().await, 0);
    }

    #[tokio::test]
    async fn test_image_store_alone_single_replica() {
        let mut f = fixture();
        f.settings.enable_nova = false;
        f.settings.enable_cinder = false;
        let cfg = config(&f.settings);

        let ctx = f
            .provisioner
            .ensure_crush_rule(&cfg, RunContext::new(None))
            .await
            .unwrap();
        let reports = f.provisioner.provision_all(&cfg, &ctx).await.unwrap();

        // rbd ships with the cluster
        assert_eq!(f.cluster.pool_names().await, vec!["images", "rbd"]);
        assert_eq!(f.cluster.pool("images").await.unwrap().size, 1);
        assert_eq!(f.cluster.identities_created().await, 1);
        assert!(f.cluster.has_identity("client.glance").await);
        assert_eq!(f.cluster.rule_count().await, 0);
        assert_eq!(reports.len(), 1);
        assert!(!f.host.ran("virsh"));
    }

    #[tokio::test]
    async fn test_three_replicas_attach_rule_to_every_pool() {
        let mut f = fixture();
        f.settings.replicas = 3;
        let cfg = config(&f.settings);

        let ctx = f
            .provisioner
            .ensure_crush_rule(&cfg, RunContext::new(None))
            .await
            .unwrap();
        let rule = ctx.crush_rule.clone().unwrap();
        f.provisioner.provision_all(&cfg, &ctx).await.unwrap();

        for name in ["images", "volumes", "vms"] {
            let pool = f.cluster.pool(name).await.unwrap();
            assert_eq!(pool.size, 3);
            assert_eq!(pool.crush_ruleset, Some(rule.id));
        }

        // Recorded rule is reused on rerun
        let again = f.provisioner.ensure_crush_rule(&cfg, ctx).await.unwrap();
        assert_eq!(again.crush_rule, Some(rule));
        assert_eq!(f.cluster.rule_count().await, 1);
    }

    #[tokio::test]
    async fn test_compute_reuses_block_store_identity() {
        let f = fixture();
        let cfg = config(&f.settings);

        let reports = f
            .provisioner
            .provision_all(&cfg, &RunContext::new(None))
            .await
            .unwrap();
        let compute = reports
            .iter()
            .find(|r| r.consumer == Consumer::Compute)
            .unwrap();
        assert_eq!(compute.minted, None);
        assert_eq!(compute.reused.as_deref(), Some("client.cinder"));

        // glance and cinder only
        assert_eq!(f.cluster.identities_created().await, 2);
        assert!(cfg.conf_dir.join("ceph.client.glance.keyring").exists());
        assert!(f.host.ran(&format!(
            "chown stack:stack {}",
            cfg.conf_dir.join("ceph.client.cinder.keyring").display()
        )));
    }

    #[tokio::test]
    async fn test_rerun_creates_nothing_new() {
        let f = fixture();
        let cfg = config(&f.settings);
        let ctx = RunContext::new(None);

        let first = f.provisioner.provision_all(&cfg, &ctx).await.unwrap();
        assert!(first.iter().any(|r| !r.pools_created.is_empty()));
        let pools = f.cluster.pool_names().await;

        let second = f.provisioner.provision_all(&cfg, &ctx).await.unwrap();
        assert!(second.iter().all(|r| r.pools_created.is_empty()));
        assert_eq!(f.cluster.pool_names().await, pools);
        assert_eq!(f.cluster.identities_created().await, 2);
    }

    #[tokio::test]
    async fn test_shared_filesystem() {
        let mut f = fixture();
        f.settings.enable_manila = true;
        let cfg = config(&f.settings);

        f.provisioner
            .provision_all(&cfg, &RunContext::new(None))
            .await
            .unwrap();
        assert!(f.cluster.pool("cephfs_data").await.is_some());
        assert!(f.cluster.pool("cephfs_metadata").await.is_some());
        assert_eq!(f.cluster.fs_list_names().await, vec!["cephfs"]);
        assert!(f.cluster.snapshots_allowed("cephfs").await);
        assert!(f.cluster.has_identity("client.manila").await);
    }

    #[tokio::test]
    async fn test_default_pools_skip_missing() {
        let f = fixture();
        f.provisioner
            .configure_default_pools(&["rbd", "data", "metadata"], 1, None)
            .await
            .unwrap();
        assert_eq!(f.cluster.pool("rbd").await.unwrap().size, 1);
        assert!(f.cluster.pool("data").await.is_none());
    }

    #[tokio::test]
    async fn test_hypervisor_secret_uses_block_store_key() {
        let f = fixture();
        let cfg = config(&f.settings);
        let ctx = RunContext::new(None);
        f.provisioner.provision_all(&cfg, &ctx).await.unwrap();

        let secrets: SecretStoreRef = Arc::new(VirshSecrets::new(f.host.clone(), cfg.data_dir.join("tmp")));
        f.provisioner
            .import_hypervisor_secret(&cfg, &ctx, &secrets)
            .await
            .unwrap();

        let key = f.cluster.auth_get_key("client.cinder").await.unwrap();
        assert!(f.host.ran(&format!(
            "virsh secret-set-value --secret {} --base64 {}",
            ctx.hypervisor_secret.unwrap(),
            key
        )));
    }
}
