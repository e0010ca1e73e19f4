//! Ceph Command-Line Adapter
//!
//! Drives a real cluster through the `ceph`, `ceph-authtool`, `ceph-mon` and
//! `ceph-osd` tools. Every `ceph` invocation names the configuration file
//! explicitly; listings are requested as JSON.

use crate::domain::model::{Caps, CephVersion, CrushRule};
use crate::domain::ports::{ClusterAdmin, HostAdapterRef, HostCommand, MonitorBootstrap, PoolDeletion};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct CephCli {
    host: HostAdapterRef,
    conf_file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PoolEntry {
    poolname: String,
}

#[derive(Debug, Deserialize)]
struct FilesystemEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RuleDump {
    rule_name: String,
    rule_id: u32,
    #[serde(default)]
    ruleset: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DaemonVersion {
    version: String,
}

impl CephCli {
    pub fn new(host: HostAdapterRef, conf_file: impl Into<PathBuf>) -> Self {
        Self {
            host,
            conf_file: conf_file.into(),
        }
    }

    fn ceph(&self) -> HostCommand {
        HostCommand::sudo("ceph").arg("-c").path_arg(&self.conf_file)
    }

    async fn run(&self, command: HostCommand) -> Result<String> {
        self.host.run(&command).await
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, command: HostCommand) -> Result<T> {
        let out = self.run(command.args(["-f", "json"])).await?;
        Ok(serde_json::from_str(out.trim())?)
    }
}

#[async_trait]
impl ClusterAdmin for CephCli {
    async fn client_version(&self) -> Result<CephVersion> {
        let out = self.run(self.ceph().arg("-v")).await?;
        CephVersion::parse(&out)
    }

    async fn daemon_version(&self, mon_id: &str) -> Result<CephVersion> {
        let out = self
            .run(self.ceph().args(["daemon", format!("mon.{}", mon_id).as_str(), "version"]))
            .await?;
        let parsed: DaemonVersion = serde_json::from_str(out.trim())?;
        CephVersion::parse(&parsed.version)
    }

    async fn bootstrap_monitor(&self, request: &MonitorBootstrap) -> Result<()> {
        info!("Creating monitor store for mon.{} (fsid {})", request.mon_id, request.fsid);

        self.run(
            HostCommand::sudo("ceph-authtool")
                .path_arg(&request.mon_keyring)
                .args(["--create-keyring", "--name=mon.", "--gen-key", "--cap", "mon", "allow *"]),
        )
        .await?;

        self.run(
            HostCommand::sudo("ceph-mon")
                .arg("-c")
                .path_arg(&request.conf_file)
                .args(["--mkfs", "-i", request.mon_id.as_str()])
                .arg("--mon-data")
                .path_arg(&request.mon_dir)
                .arg("--keyring")
                .path_arg(&request.mon_keyring),
        )
        .await?;
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        let pools: Vec<PoolEntry> = self.run_json(self.ceph().args(["osd", "lspools"])).await?;
        Ok(pools.into_iter().map(|p| p.poolname).collect())
    }

    async fn pool_create(&self, pool: &str, pg_num: u32) -> Result<()> {
        let pg = pg_num.to_string();
        self.run(self.ceph().args(["osd", "pool", "create", pool, pg.as_str(), pg.as_str()]))
            .await?;
        Ok(())
    }

    async fn pool_set(&self, pool: &str, key: &str, value: &str) -> Result<()> {
        self.run(self.ceph().args(["osd", "pool", "set", pool, key, value]))
            .await?;
        Ok(())
    }

    async fn pool_delete(&self, deletion: &PoolDeletion) -> Result<()> {
        if !deletion.is_consistent() {
            return Err(Error::ClusterOperation {
                operation: format!("osd pool delete {}", deletion.pool),
                reason: "pool name must be repeated".to_string(),
            });
        }
        self.run(self.ceph().args([
            "osd",
            "pool",
            "delete",
            deletion.pool.as_str(),
            deletion.pool_again.as_str(),
            PoolDeletion::MARKER,
        ]))
        .await?;
        Ok(())
    }

    async fn auth_get_or_create(&self, entity: &str, caps: &Caps) -> Result<String> {
        self.run(
            self.ceph()
                .args(["auth", "get-or-create", entity])
                .args(caps.to_args()),
        )
        .await
    }

    async fn auth_get_key(&self, entity: &str) -> Result<String> {
        let out = self.run(self.ceph().args(["auth", "get-key", entity])).await?;
        Ok(out.trim().to_string())
    }

    async fn auth_del(&self, entity: &str) -> Result<()> {
        self.run(self.ceph().args(["auth", "del", entity])).await?;
        Ok(())
    }

    async fn crush_rule_create_simple(
        &self,
        name: &str,
        root: &str,
        failure_domain: &str,
    ) -> Result<()> {
        self.run(self.ceph().args([
            "osd",
            "crush",
            "rule",
            "create-simple",
            name,
            root,
            failure_domain,
        ]))
        .await?;
        Ok(())
    }

    async fn crush_rule_dump(&self, name: &str) -> Result<CrushRule> {
        let dump: RuleDump = self
            .run_json(self.ceph().args(["osd", "crush", "rule", "dump", name]))
            .await?;
        debug!("Rule {} has id {} (ruleset {:?})", dump.rule_name, dump.rule_id, dump.ruleset);
        Ok(CrushRule {
            name: dump.rule_name,
            id: dump.ruleset.unwrap_or(dump.rule_id),
        })
    }

    async fn fs_list(&self) -> Result<Vec<String>> {
        let filesystems: Vec<FilesystemEntry> = self.run_json(self.ceph().args(["fs", "ls"])).await?;
        Ok(filesystems.into_iter().map(|f| f.name).collect())
    }

    async fn fs_new(&self, fs: &str, metadata_pool: &str, data_pool: &str) -> Result<()> {
        self.run(self.ceph().args(["fs", "new", fs, metadata_pool, data_pool]))
            .await?;
        Ok(())
    }

    async fn allow_new_snaps(&self, _fs: &str) -> Result<()> {
        self.run(self.ceph().args([
            "mds",
            "set",
            "allow_new_snaps",
            "true",
            "--yes-i-really-mean-it",
        ]))
        .await?;
        Ok(())
    }

    async fn osd_ls(&self) -> Result<Vec<u32>> {
        self.run_json(self.ceph().args(["osd", "ls"])).await
    }

    async fn osd_create(&self) -> Result<u32> {
        let out = self.run(self.ceph().args(["osd", "create"])).await?;
        out.trim().parse().map_err(|_| Error::ClusterOperation {
            operation: "osd create".to_string(),
            reason: format!("unexpected output '{}'", out.trim()),
        })
    }

    async fn osd_mkfs(&self, id: u32, data_dir: &Path) -> Result<()> {
        self.run(
            HostCommand::sudo("ceph-osd")
                .arg("-c")
                .path_arg(&self.conf_file)
                .args(["-i", id.to_string().as_str(), "--mkfs"])
                .arg("--osd-data")
                .path_arg(data_dir),
        )
        .await?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "ceph-cli"
    }
}
