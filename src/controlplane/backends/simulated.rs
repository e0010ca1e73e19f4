//! Simulated Cluster
//!
//! In-memory stand-in for a running cluster. Pools, identities, placement
//! rules and OSD ids live in maps; bootstrapping the monitor writes the admin
//! keyring to disk after a delay, the way a real monitor does once it reaches
//! quorum. Backs `--simulate` runs and the orchestrator tests.

use crate::domain::model::{Caps, CephVersion, CrushRule};
use crate::domain::ports::{ClusterAdmin, MonitorBootstrap, PoolDeletion};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// When the simulated monitor writes the admin keyring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumBehavior {
    /// Keyring appears this long after bootstrap
    After(Duration),
    /// Monitor never reaches quorum
    Never,
}

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub client_version: CephVersion,
    pub daemon_version: CephVersion,
    pub quorum: QuorumBehavior,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            client_version: CephVersion::new(10, 2),
            daemon_version: CephVersion::new(10, 2),
            quorum: QuorumBehavior::After(Duration::from_secs(1)),
        }
    }
}

impl SimulatedConfig {
    pub fn with_version(version: CephVersion) -> Self {
        Self {
            client_version: version,
            daemon_version: version,
            ..Default::default()
        }
    }
}

// =============================================================================
// Cluster State
// =============================================================================

/// Attributes of a simulated pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPool {
    pub pg_num: u32,
    pub size: u32,
    pub crush_ruleset: Option<u32>,
}

#[derive(Debug, Clone)]
struct Identity {
    caps: Caps,
    key: String,
}

#[derive(Debug, Default)]
struct ClusterState {
    pools: BTreeMap<String, SimulatedPool>,
    identities: BTreeMap<String, Identity>,
    rules: BTreeMap<String, u32>,
    filesystems: BTreeMap<String, (String, String)>,
    snapshots: BTreeSet<String>,
    osds: BTreeSet<u32>,
    identities_created: u32,
}

// =============================================================================
// Simulated Cluster
// =============================================================================

pub struct SimulatedCluster {
    config: SimulatedConfig,
    state: RwLock<ClusterState>,
}

fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

fn keyring_text(entity: &str, key: &str) -> String {
    format!("[{}]\n\tkey = {}\n", entity, key)
}

impl SimulatedCluster {
    /// A cluster with the default pools its release ships with
    pub fn new(config: SimulatedConfig) -> Self {
        let mut state = ClusterState::default();
        let defaults: &[&str] = if config.daemon_version < CephVersion::new(0, 87) {
            &["rbd", "data", "metadata"]
        } else {
            &["rbd"]
        };
        for pool in defaults {
            state.pools.insert(
                pool.to_string(),
                SimulatedPool {
                    pg_num: 64,
                    size: 3,
                    crush_ruleset: None,
                },
            );
        }

        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub async fn pool(&self, name: &str) -> Option<SimulatedPool> {
        self.state.read().await.pools.get(name).cloned()
    }

    pub async fn pool_names(&self) -> Vec<String> {
        self.state.read().await.pools.keys().cloned().collect()
    }

    pub async fn has_identity(&self, entity: &str) -> bool {
        self.state.read().await.identities.contains_key(entity)
    }

    pub async fn identity_caps(&self, entity: &str) -> Option<Caps> {
        self.state
            .read()
            .await
            .identities
            .get(entity)
            .map(|i| i.caps.clone())
    }

    /// Number of identities ever created
    pub async fn identities_created(&self) -> u32 {
        self.state.read().await.identities_created
    }

    pub async fn rule_count(&self) -> usize {
        self.state.read().await.rules.len()
    }

    pub async fn fs_list_names(&self) -> Vec<String> {
        self.state.read().await.filesystems.keys().cloned().collect()
    }

    pub async fn snapshots_allowed(&self, fs: &str) -> bool {
        self.state.read().await.snapshots.contains(fs)
    }

    fn schedule_quorum(&self, admin_keyring: &Path, key: String) {
        let delay = match self.config.quorum {
            QuorumBehavior::After(delay) => delay,
            QuorumBehavior::Never => {
                warn!("Simulated monitor will never reach quorum");
                return;
            }
        };

        let path = admin_keyring.to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::write(&path, keyring_text("client.admin", &key)) {
                Ok(()) => debug!("Simulated monitor wrote {}", path.display()),
                Err(e) => warn!("Simulated monitor failed to write {}: {}", path.display(), e),
            }
        });
    }
}

fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::ClusterOperation {
        operation: operation.into(),
        reason: reason.into(),
    }
}

#[async_trait]
impl ClusterAdmin for SimulatedCluster {
    async fn client_version(&self) -> Result<CephVersion> {
        Ok(self.config.client_version)
    }

    async fn daemon_version(&self, mon_id: &str) -> Result<CephVersion> {
        debug!("Simulated mon.{} reports {}", mon_id, self.config.daemon_version);
        Ok(self.config.daemon_version)
    }

    async fn bootstrap_monitor(&self, request: &MonitorBootstrap) -> Result<()> {
        info!("Simulating monitor bootstrap for mon.{}", request.mon_id);

        let mon_key = generate_key();
        tokio::fs::create_dir_all(&request.mon_dir).await?;
        if let Some(parent) = request.mon_keyring.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.mon_keyring, keyring_text("mon.", &mon_key)).await?;
        tokio::fs::write(request.mon_dir.join("keyring"), keyring_text("mon.", &mon_key)).await?;

        let admin_key = generate_key();
        {
            let mut state = self.state.write().await;
            state.identities.insert(
                "client.admin".to_string(),
                Identity {
                    caps: Caps::new("allow *").osd("allow *").mds("allow *"),
                    key: admin_key.clone(),
                },
            );
        }

        self.schedule_quorum(&request.admin_keyring, admin_key);
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        Ok(self.pool_names().await)
    }

    async fn pool_create(&self, pool: &str, pg_num: u32) -> Result<()> {
        let mut state = self.state.write().await;
        if state.pools.contains_key(pool) {
            debug!("pool '{}' already exists", pool);
            return Ok(());
        }
        state.pools.insert(
            pool.to_string(),
            SimulatedPool {
                pg_num,
                size: 3,
                crush_ruleset: None,
            },
        );
        Ok(())
    }

    async fn pool_set(&self, pool: &str, key: &str, value: &str) -> Result<()> {
        let operation = format!("osd pool set {} {} {}", pool, key, value);
        let mut state = self.state.write().await;
        let rule_ids: BTreeSet<u32> = state.rules.values().copied().collect();
        let entry = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| rejected(&operation, "pool does not exist"))?;
        let number: u32 = value
            .parse()
            .map_err(|_| rejected(&operation, "value is not a number"))?;

        match key {
            "size" => entry.size = number,
            "crush_ruleset" => {
                if !rule_ids.contains(&number) {
                    return Err(rejected(&operation, "ruleset does not exist"));
                }
                entry.crush_ruleset = Some(number);
            }
            "pg_num" => entry.pg_num = number,
            _ => return Err(rejected(&operation, "unknown key")),
        }
        Ok(())
    }

    async fn pool_delete(&self, deletion: &PoolDeletion) -> Result<()> {
        if !deletion.is_consistent() {
            return Err(rejected(
                format!("osd pool delete {}", deletion.pool),
                "pool name must be repeated",
            ));
        }
        self.state.write().await.pools.remove(&deletion.pool);
        Ok(())
    }

    async fn auth_get_or_create(&self, entity: &str, caps: &Caps) -> Result<String> {
        let mut state = self.state.write().await;
        if let Some(identity) = state.identities.get(entity) {
            if &identity.caps != caps {
                return Err(rejected(
                    format!("auth get-or-create {}", entity),
                    "key exists but caps do not match",
                ));
            }
            return Ok(keyring_text(entity, &identity.key));
        }

        let key = generate_key();
        state.identities.insert(
            entity.to_string(),
            Identity {
                caps: caps.clone(),
                key: key.clone(),
            },
        );
        state.identities_created += 1;
        Ok(keyring_text(entity, &key))
    }

    async fn auth_get_key(&self, entity: &str) -> Result<String> {
        self.state
            .read()
            .await
            .identities
            .get(entity)
            .map(|i| i.key.clone())
            .ok_or_else(|| rejected(format!("auth get-key {}", entity), "entity does not exist"))
    }

    async fn auth_del(&self, entity: &str) -> Result<()> {
        self.state.write().await.identities.remove(entity);
        Ok(())
    }

    async fn crush_rule_create_simple(
        &self,
        name: &str,
        _root: &str,
        _failure_domain: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.rules.contains_key(name) {
            let id = state.rules.len() as u32 + 1;
            state.rules.insert(name.to_string(), id);
        }
        Ok(())
    }

    async fn crush_rule_dump(&self, name: &str) -> Result<CrushRule> {
        self.state
            .read()
            .await
            .rules
            .get(name)
            .map(|&id| CrushRule {
                name: name.to_string(),
                id,
            })
            .ok_or_else(|| rejected(format!("osd crush rule dump {}", name), "no such rule"))
    }

    async fn fs_list(&self) -> Result<Vec<String>> {
        Ok(self.fs_list_names().await)
    }

    async fn fs_new(&self, fs: &str, metadata_pool: &str, data_pool: &str) -> Result<()> {
        let mut state = self.state.write().await;
        for pool in [metadata_pool, data_pool] {
            if !state.pools.contains_key(pool) {
                return Err(rejected(format!("fs new {}", fs), format!("pool '{}' does not exist", pool)));
            }
        }
        state
            .filesystems
            .insert(fs.to_string(), (metadata_pool.to_string(), data_pool.to_string()));
        Ok(())
    }

    async fn allow_new_snaps(&self, fs: &str) -> Result<()> {
        self.state.write().await.snapshots.insert(fs.to_string());
        Ok(())
    }

    async fn osd_ls(&self) -> Result<Vec<u32>> {
        Ok(self.state.read().await.osds.iter().copied().collect())
    }

    async fn osd_create(&self) -> Result<u32> {
        let mut state = self.state.write().await;
        let id = (0..).find(|id| !state.osds.contains(id)).unwrap_or_default();
        state.osds.insert(id);
        Ok(id)
    }

    async fn osd_mkfs(&self, id: u32, data_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(data_dir).await?;
        tokio::fs::write(data_dir.join("whoami"), format!("{}\n", id)).await?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_default_pools_follow_release() {
        let old = SimulatedCluster::new(SimulatedConfig::with_version(CephVersion::new(0, 80)));
        assert_eq!(old.pool_names().await, vec!["data", "metadata", "rbd"]);

        let new = SimulatedCluster::new(SimulatedConfig::with_version(CephVersion::new(9, 2)));
        assert_eq!(new.pool_names().await, vec!["rbd"]);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let cluster = SimulatedCluster::new(SimulatedConfig::default());
        let caps = Caps::new("allow r").osd("allow rwx pool=images");

        let first = cluster.auth_get_or_create("client.glance", &caps).await.unwrap();
        let second = cluster.auth_get_or_create("client.glance", &caps).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cluster.identities_created().await, 1);

        let other = Caps::new("allow r");
        assert_matches!(
            cluster.auth_get_or_create("client.glance", &other).await,
            Err(Error::ClusterOperation { .. })
        );
    }

    #[tokio::test]
    async fn test_pool_set_requires_known_rule() {
        let cluster = SimulatedCluster::new(SimulatedConfig::default());
        cluster.pool_create("images", 8).await.unwrap();
        assert!(cluster.pool_set("images", "crush_ruleset", "1").await.is_err());

        cluster.crush_rule_create_simple("devstack", "default", "osd").await.unwrap();
        let rule = cluster.crush_rule_dump("devstack").await.unwrap();
        cluster
            .pool_set("images", "crush_ruleset", &rule.id.to_string())
            .await
            .unwrap();
        assert_eq!(cluster.pool("images").await.unwrap().crush_ruleset, Some(rule.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_writes_admin_keyring_later() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = SimulatedCluster::new(SimulatedConfig::default());
        let request = MonitorBootstrap {
            mon_id: "node1".into(),
            fsid: Uuid::new_v4(),
            mon_dir: dir.path().join("mon/ceph-node1"),
            mon_keyring: dir.path().join("tmp/keyring.mon.node1"),
            conf_file: dir.path().join("ceph.conf"),
            admin_keyring: dir.path().join("ceph.client.admin.keyring"),
        };

        cluster.bootstrap_monitor(&request).await.unwrap();
        assert!(!request.admin_keyring.exists());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(request.admin_keyring.exists());
        assert_eq!(
            cluster.daemon_version("node1").await.unwrap(),
            CephVersion::new(10, 2)
        );
    }
}
