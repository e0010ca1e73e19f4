//! Lifecycle Orchestrator
//!
//! Drives the cluster through install, configure, init, start, stop and
//! cleanup. Each phase takes the run context from the previous one and hands
//! back the updated context; phases are strictly sequential and every one of
//! them is safe to rerun after a failure.

use crate::config::CephConf;
use crate::controlplane::context::RunContext;
use crate::controlplane::gateway::{self, GatewayProvisioner};
use crate::controlplane::provisioner::ConsumerProvisioner;
use crate::controlplane::readiness::{ReadinessGate, READINESS_ATTEMPTS, READINESS_INTERVAL};
use crate::controlplane::teardown::TeardownCoordinator;
use crate::controlplane::version::{ReleaseBucket, VersionGate, CEPH_USER};
use crate::domain::model::{
    Caps, CephVersion, ClusterConfig, ClusterTopology, Consumer, CrushRule, LifecyclePhase, Phase,
};
use crate::domain::ports::{
    CatalogRegistrarRef, ClusterAdminRef, HostAdapterRef, HostCommand, MonitorBootstrap,
    SecretStoreRef,
};
use crate::error::{Error, Result};
use crate::host::{self, Capabilities, Daemon, ServiceSupervisor};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Data directory subtrees created before the monitor is bootstrapped
const DATA_SUBDIRS: [&str; 6] = ["bootstrap-mds", "bootstrap-osd", "mds", "mon", "osd", "tmp"];

// =============================================================================
// Orchestrator Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay between readiness polls
    pub readiness_interval: Duration,
    /// Readiness polls before giving up
    pub readiness_attempts: u32,
    pub version_gate: VersionGate,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            readiness_interval: READINESS_INTERVAL,
            readiness_attempts: READINESS_ATTEMPTS,
            version_gate: VersionGate::default(),
        }
    }
}

/// The external systems a run drives
#[derive(Clone)]
pub struct Adapters {
    pub admin: ClusterAdminRef,
    pub host: HostAdapterRef,
    pub catalog: CatalogRegistrarRef,
    pub secrets: SecretStoreRef,
}

// =============================================================================
// Status
// =============================================================================

/// Summary printed by the `status` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub phase: LifecyclePhase,
    pub topology: ClusterTopology,
    pub backend: String,
    pub fsid: Uuid,
    pub replicas: u32,
    pub consumers: Vec<Consumer>,
    pub osd_ids: Vec<u32>,
    pub crush_rule: Option<CrushRule>,
    pub client_version: Option<CephVersion>,
    pub daemon_version: Option<CephVersion>,
    pub hypervisor_secret: Option<Uuid>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

// =============================================================================
// Phase Planning
// =============================================================================

/// What a multi-phase command does with one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Run,
    /// The run is already past this phase
    Skip,
}

/// Decide whether `phase` runs from `current` inside a multi-phase command
pub fn plan_step(phase: Phase, current: LifecyclePhase) -> Result<Step> {
    if phase.allowed_from(current) {
        return Ok(Step::Run);
    }
    if current != LifecyclePhase::CleanedUp && current > phase.target() {
        return Ok(Step::Skip);
    }
    Err(Error::PhaseOrder {
        phase: phase.to_string(),
        current: current.to_string(),
    })
}

/// Phases run by `stack`
pub const STACK_PHASES: [Phase; 4] = [Phase::Install, Phase::Configure, Phase::Init, Phase::Start];

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    config: OrchestratorConfig,
    cluster: ClusterConfig,
    capabilities: Capabilities,
    admin: ClusterAdminRef,
    host: HostAdapterRef,
    supervisor: ServiceSupervisor,
    provisioner: ConsumerProvisioner,
    gateway: GatewayProvisioner,
    teardown: TeardownCoordinator,
    secrets: SecretStoreRef,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        cluster: ClusterConfig,
        capabilities: Capabilities,
        adapters: Adapters,
    ) -> Self {
        let Adapters {
            admin,
            host,
            catalog,
            secrets,
        } = adapters;

        Self {
            supervisor: ServiceSupervisor::new(host.clone(), capabilities.init),
            provisioner: ConsumerProvisioner::new(admin.clone(), host.clone()),
            gateway: GatewayProvisioner::new(host.clone(), catalog),
            teardown: TeardownCoordinator::new(admin.clone(), host.clone(), secrets.clone()),
            config,
            cluster,
            capabilities,
            admin,
            host,
            secrets,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Cancels a pending readiness wait
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self, ctx: &RunContext) -> OrchestratorStatus {
        OrchestratorStatus {
            phase: ctx.phase,
            topology: self.cluster.cluster,
            backend: self.admin.backend_name().to_string(),
            fsid: ctx.fsid,
            replicas: self.cluster.replicas,
            consumers: self.cluster.enabled_bindings().map(|b| b.consumer).collect(),
            osd_ids: ctx.osd_ids.clone(),
            crush_rule: ctx.crush_rule.clone(),
            client_version: ctx.client_version,
            daemon_version: ctx.daemon_version,
            hypervisor_secret: ctx.hypervisor_secret,
            updated_at: ctx.updated_at,
        }
    }

    /// Run one phase, enforcing lifecycle order
    pub async fn run_phase(&self, phase: Phase, ctx: RunContext) -> Result<RunContext> {
        if !phase.allowed_from(ctx.phase) {
            return Err(Error::PhaseOrder {
                phase: phase.to_string(),
                current: ctx.phase.to_string(),
            });
        }

        info!("Running {} (cluster is {})", phase, ctx.phase);
        let ctx = match phase {
            Phase::Install => self.install(ctx).await?,
            Phase::Configure => self.configure(ctx).await?,
            Phase::Init => self.init(ctx).await?,
            Phase::Start => self.start(ctx).await?,
            Phase::Stop => self.stop(ctx).await?,
            Phase::Cleanup => self.cleanup(ctx).await?,
        };

        let ctx = ctx.advance(phase.target());
        info!("{} complete; cluster is {}", phase, ctx.phase);
        Ok(ctx)
    }

    // =========================================================================
    // Install
    // =========================================================================

    async fn install(&self, ctx: RunContext) -> Result<RunContext> {
        let cfg = &self.cluster;
        self.capabilities.ensure_supported(cfg.force_install)?;

        if !cfg.is_embedded() {
            let packages = self.capabilities.client_packages();
            host::install_packages(self.host.as_ref(), self.capabilities.packages, &packages).await?;
            tokio::fs::create_dir_all(&cfg.conf_dir).await?;
            return Ok(ctx);
        }

        let packages = self.capabilities.server_packages(
            cfg.runs_local_gateway(),
            cfg.is_enabled(Consumer::SharedFilesystem),
        );
        host::install_packages(self.host.as_ref(), self.capabilities.packages, &packages).await?;

        tokio::fs::create_dir_all(&cfg.data_dir).await?;
        tokio::fs::create_dir_all(&cfg.conf_dir).await?;

        if !cfg.disk_image.exists() {
            if let Some(parent) = cfg.disk_image.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let image = tokio::fs::File::create(&cfg.disk_image).await?;
            image.set_len(cfg.disk_size_bytes).await?;
            info!(
                "Created {} byte backing image {}",
                cfg.disk_size_bytes,
                cfg.disk_image.display()
            );
            self.host
                .run(&HostCommand::sudo("mkfs.xfs").arg("-f").path_arg(&cfg.disk_image))
                .await?;
        }

        if self.host.is_mounted(&cfg.data_dir).await? {
            debug!("{} already mounted", cfg.data_dir.display());
        } else {
            self.host
                .run(
                    &HostCommand::sudo("mount")
                        .args(["-t", "xfs", "-o", "loop,noatime,nodiratime,nobarrier,logbufs=8"])
                        .path_arg(&cfg.disk_image)
                        .path_arg(&cfg.data_dir),
                )
                .await?;
        }
        Ok(ctx)
    }

    // =========================================================================
    // Configure
    // =========================================================================

    async fn configure(&self, mut ctx: RunContext) -> Result<RunContext> {
        let cfg = &self.cluster;
        let client_version = self.admin.client_version().await?;
        let client_bucket = self.config.version_gate.classify(client_version);
        info!("Cluster tools report {} ({:?})", client_version, client_bucket);
        ctx.client_version = Some(client_version);

        if cfg.is_embedded() {
            ctx = self.configure_embedded(ctx, client_bucket).await?;
        } else {
            ctx = self.provisioner.ensure_crush_rule(cfg, ctx).await?;
        }

        self.provisioner.provision_all(cfg, &ctx).await?;

        if cfg.is_enabled(Consumer::ObjectGateway) {
            self.gateway.provision(cfg, &self.supervisor).await?;
        }

        self.provisioner
            .import_hypervisor_secret(cfg, &ctx, &self.secrets)
            .await?;

        if cfg.is_embedded() && client_bucket.owns_data_dir() {
            host::chown_recursive(self.host.as_ref(), &cfg.data_dir, CEPH_USER).await?;
        }
        Ok(ctx)
    }

    async fn configure_embedded(
        &self,
        mut ctx: RunContext,
        client_bucket: ReleaseBucket,
    ) -> Result<RunContext> {
        let cfg = &self.cluster;
        for sub in DATA_SUBDIRS {
            tokio::fs::create_dir_all(cfg.data_dir.join(sub)).await?;
        }

        CephConf::for_cluster(cfg)
            .merge_into_file(&cfg.conf_file())
            .await?;

        let mon_dir = self.daemon_dir("mon");
        if mon_dir.join("done").exists() {
            debug!("Monitor store {} already exists", mon_dir.display());
        } else {
            self.admin
                .bootstrap_monitor(&MonitorBootstrap {
                    mon_id: cfg.hostname.clone(),
                    fsid: cfg.fsid,
                    mon_dir: mon_dir.clone(),
                    mon_keyring: cfg
                        .data_dir
                        .join("tmp")
                        .join(format!("keyring.mon.{}", cfg.hostname)),
                    conf_file: cfg.conf_file(),
                    admin_keyring: cfg.admin_keyring(),
                })
                .await?;
        }
        self.supervisor.write_markers(&mon_dir).await?;

        if client_bucket.owns_data_dir() {
            host::chown_recursive(self.host.as_ref(), &cfg.data_dir, CEPH_USER).await?;
        }

        self.supervisor
            .start(&Daemon::Monitor(cfg.hostname.clone()))
            .await?;

        ReadinessGate::new(cfg.admin_keyring())
            .with_interval(self.config.readiness_interval)
            .with_attempts(self.config.readiness_attempts)
            .with_cancellation(self.cancel.clone())
            .wait()
            .await?;

        let daemon_version = self.admin.daemon_version(&cfg.hostname).await?;
        let daemon_bucket = self.config.version_gate.classify(daemon_version);
        info!("Monitor reports {} ({:?})", daemon_version, daemon_bucket);
        ctx.daemon_version = Some(daemon_version);

        ctx = self.provisioner.ensure_crush_rule(cfg, ctx).await?;
        self.provisioner
            .configure_default_pools(
                daemon_bucket.default_pools(),
                cfg.replicas,
                ctx.crush_rule.as_ref(),
            )
            .await?;

        ctx = self.create_osds(ctx).await?;

        if cfg.is_enabled(Consumer::SharedFilesystem) {
            self.create_metadata_server().await?;
        }
        Ok(ctx)
    }

    fn daemon_dir(&self, kind: &str) -> PathBuf {
        self.cluster
            .data_dir
            .join(kind)
            .join(format!("ceph-{}", self.cluster.hostname))
    }

    /// Allocate OSDs until there is one per replica
    async fn create_osds(&self, mut ctx: RunContext) -> Result<RunContext> {
        let cfg = &self.cluster;
        let mut ids = self.admin.osd_ls().await?;

        while (ids.len() as u32) < cfg.replicas {
            let id = self.admin.osd_create().await?;
            let dir = cfg.data_dir.join("osd").join(format!("ceph-{}", id));
            tokio::fs::create_dir_all(&dir).await?;
            self.admin.osd_mkfs(id, &dir).await?;

            let keyring = self
                .admin
                .auth_get_or_create(
                    &format!("osd.{}", id),
                    &Caps::new("allow profile osd").osd("allow *"),
                )
                .await?;
            tokio::fs::write(dir.join("keyring"), keyring).await?;
            self.supervisor.write_markers(&dir).await?;

            info!("Created osd.{}", id);
            ids.push(id);
        }

        ctx.osd_ids = ids;
        Ok(ctx)
    }

    async fn create_metadata_server(&self) -> Result<()> {
        let cfg = &self.cluster;
        let dir = self.daemon_dir("mds");
        tokio::fs::create_dir_all(&dir).await?;

        let keyring = self
            .admin
            .auth_get_or_create(
                &format!("mds.{}", cfg.hostname),
                &Caps::new("allow profile mds").osd("allow rw").mds("allow"),
            )
            .await?;
        tokio::fs::write(dir.join("keyring"), keyring).await?;
        self.supervisor.write_markers(&dir).await
    }

    // =========================================================================
    // Init / Start / Stop
    // =========================================================================

    /// Every daemon this run manages on the local host
    fn local_daemons(&self, ctx: &RunContext) -> Vec<Daemon> {
        let cfg = &self.cluster;
        if !cfg.is_embedded() {
            return Vec::new();
        }

        let mut daemons = vec![Daemon::Monitor(cfg.hostname.clone())];
        daemons.extend(ctx.osd_ids.iter().map(|&id| Daemon::Osd(id)));
        if cfg.is_enabled(Consumer::SharedFilesystem) {
            daemons.push(Daemon::Metadata(cfg.hostname.clone()));
        }
        if cfg.runs_local_gateway() {
            daemons.push(Daemon::Gateway(gateway::instance_name(cfg)));
        }
        daemons
    }

    /// Clear daemons left over from a previous run
    async fn init(&self, ctx: RunContext) -> Result<RunContext> {
        self.supervisor.terminate(&self.local_daemons(&ctx)).await;
        Ok(ctx)
    }

    async fn start(&self, ctx: RunContext) -> Result<RunContext> {
        for daemon in self.local_daemons(&ctx) {
            self.supervisor.start(&daemon).await?;
        }
        Ok(ctx)
    }

    async fn stop(&self, ctx: RunContext) -> Result<RunContext> {
        self.supervisor.stop(&self.local_daemons(&ctx)).await;
        Ok(ctx)
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    async fn cleanup(&self, ctx: RunContext) -> Result<RunContext> {
        self.teardown
            .cleanup(&self.cluster, &ctx, &self.supervisor)
            .await?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploySettings;
    use crate::controlplane::backends::{QuorumBehavior, SimulatedCluster, SimulatedConfig};
    use crate::controlplane::platform::{InMemoryCatalog, VirshSecrets};
    use crate::host::{Distro, DryRunHost};
    use assert_matches::assert_matches;
    use std::path::Path;
    use std::sync::Arc;

    const XENIAL: &str = "ID=ubuntu\nVERSION_ID=\"16.04\"\nVERSION_CODENAME=xenial\n";

    struct Harness {
        dir: tempfile::TempDir,
        cluster: Arc<SimulatedCluster>,
        host: Arc<DryRunHost>,
        catalog: Arc<InMemoryCatalog>,
        orchestrator: Orchestrator,
    }

    fn settings(root: &Path) -> DeploySettings {
        DeploySettings {
            data_dir: root.join("var/lib/ceph"),
            conf_dir: root.join("etc/ceph"),
            disk_image: root.join("var/lib/ceph-drives/ceph.img"),
            disk_size: "16M".into(),
            hostname: "node1".into(),
            host_ip: "10.0.0.5".into(),
            service_host: "10.0.0.5".into(),
            stack_user: "stack".into(),
            keystone_ca_cert: root.join("ca.pem"),
            ..Default::default()
        }
    }

    fn harness_with(
        dir: tempfile::TempDir,
        settings: DeploySettings,
        simulated: SimulatedConfig,
    ) -> Harness {
        let cluster = Arc::new(SimulatedCluster::new(simulated));
        let host = Arc::new(DryRunHost::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let secrets = Arc::new(VirshSecrets::new(host.clone(), dir.path().join("scratch")));
        let config = ClusterConfig::resolve(&settings, Uuid::new_v4()).unwrap();
        let capabilities = Capabilities::from_distro(Distro::parse_os_release(XENIAL));

        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            config,
            capabilities,
            Adapters {
                admin: cluster.clone(),
                host: host.clone(),
                catalog: catalog.clone(),
                secrets,
            },
        );

        Harness {
            dir,
            cluster,
            host,
            catalog,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        harness_with(dir, s, SimulatedConfig::default())
    }

    async fn run(h: &Harness, phases: &[Phase], mut ctx: RunContext) -> Result<RunContext> {
        for &phase in phases {
            ctx = h.orchestrator.run_phase(phase, ctx).await?;
        }
        Ok(ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_single_replica() {
        let h = harness();
        let cfg = h.orchestrator.cluster().clone();

        let ctx = run(&h, &STACK_PHASES, RunContext::new(None)).await.unwrap();
        assert_eq!(ctx.phase, LifecyclePhase::Running);

        // Configuration and readiness
        assert!(cfg.conf_file().exists());
        assert!(cfg.admin_keyring().exists());
        let mon_dir = cfg.data_dir.join("mon/ceph-node1");
        assert!(mon_dir.join("done").exists());
        assert!(mon_dir.join("systemd").exists());

        // One OSD, no placement rule
        assert_eq!(ctx.osd_ids, vec![0]);
        assert!(ctx.crush_rule.is_none());
        assert_eq!(h.cluster.rule_count().await, 0);

        for name in ["rbd", "images", "volumes", "vms"] {
            let pool = h.cluster.pool(name).await.unwrap();
            assert_eq!(pool.size, 1, "pool {}", name);
            assert_eq!(pool.crush_ruleset, None);
        }

        // glance, cinder and osd.0
        assert_eq!(h.cluster.identities_created().await, 3);
        assert!(h.host.ran("virsh secret-set-value"));
        assert!(h.host.ran("systemctl start ceph-mon@node1"));
        assert!(h.host.ran("systemctl start ceph-osd@0"));
        // 10.2 runs daemons as ceph
        assert!(h.host.ran(&format!("chown -R ceph:ceph {}", cfg.data_dir.display())));

        let ctx = run(&h, &[Phase::Stop, Phase::Cleanup], ctx).await.unwrap();
        assert_eq!(ctx.phase, LifecyclePhase::CleanedUp);
        assert!(h.host.ran("systemctl stop ceph-mon.target"));
        assert!(!cfg.data_dir.exists());
        assert!(!cfg.disk_image.exists());
        assert_eq!(std::fs::read_dir(&cfg.conf_dir).unwrap().count(), 0);
        assert!(h.host.ran("virsh secret-undefine"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_replicas_share_one_rule() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.replicas = 3;
        let h = harness_with(dir, s, SimulatedConfig::default());

        let ctx = run(&h, &[Phase::Install, Phase::Configure], RunContext::new(None))
            .await
            .unwrap();

        let rule = ctx.crush_rule.clone().unwrap();
        assert_eq!(ctx.osd_ids, vec![0, 1, 2]);
        assert_eq!(h.cluster.rule_count().await, 1);
        for name in ["rbd", "images", "volumes", "vms"] {
            let pool = h.cluster.pool(name).await.unwrap();
            assert_eq!(pool.size, 3);
            assert_eq!(pool.crush_ruleset, Some(rule.id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_stops_before_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let simulated = SimulatedConfig {
            quorum: QuorumBehavior::Never,
            ..Default::default()
        };
        let h = harness_with(dir, s, simulated);

        let ctx = h
            .orchestrator
            .run_phase(Phase::Install, RunContext::new(None))
            .await
            .unwrap();
        let result = h.orchestrator.run_phase(Phase::Configure, ctx).await;

        assert_matches!(result, Err(Error::ReadinessTimeout { attempts: 3, .. }));
        assert!(h.cluster.pool("images").await.is_none());
        assert_eq!(h.cluster.identities_created().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_release_keeps_root_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let h = harness_with(dir, s, SimulatedConfig::with_version(CephVersion::new(0, 80)));

        let ctx = run(&h, &[Phase::Install, Phase::Configure], RunContext::new(None))
            .await
            .unwrap();

        assert_eq!(ctx.daemon_version, Some(CephVersion::new(0, 80)));
        for name in ["rbd", "data", "metadata"] {
            assert_eq!(h.cluster.pool(name).await.unwrap().size, 1);
        }
        assert!(!h.host.ran("chown -R ceph:ceph"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_infernalis_hands_data_dir_to_ceph() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let h = harness_with(dir, s, SimulatedConfig::with_version(CephVersion::new(9, 2)));

        run(&h, &[Phase::Install, Phase::Configure], RunContext::new(None))
            .await
            .unwrap();

        assert!(h.cluster.pool("data").await.is_none());
        assert_eq!(h.cluster.pool("rbd").await.unwrap().size, 1);
        assert!(h.host.ran("chown -R ceph:ceph"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_are_idempotent() {
        let h = harness();
        let ctx = run(&h, &[Phase::Install, Phase::Install], RunContext::new(None))
            .await
            .unwrap();
        assert_eq!(h.host.count("mkfs.xfs"), 1);
        assert_eq!(h.host.count("mount"), 1);

        let ctx = run(&h, &[Phase::Configure], ctx).await.unwrap();
        let pools = h.cluster.pool_names().await;
        let identities = h.cluster.identities_created().await;

        let ctx = run(&h, &[Phase::Configure], ctx).await.unwrap();
        assert_eq!(h.cluster.pool_names().await, pools);
        assert_eq!(h.cluster.identities_created().await, identities);
        assert_eq!(ctx.osd_ids, vec![0]);
        assert_eq!(h.host.count("ceph-authtool"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_order_is_enforced() {
        let h = harness();
        let result = h
            .orchestrator
            .run_phase(Phase::Start, RunContext::new(None))
            .await;
        assert_matches!(result, Err(Error::PhaseOrder { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_terminates_stale_daemons() {
        let h = harness();
        let ctx = run(&h, &STACK_PHASES, RunContext::new(None)).await.unwrap();
        let ctx = run(&h, &[Phase::Init], ctx).await.unwrap();

        assert_eq!(ctx.phase, LifecyclePhase::Initialized);
        assert_eq!(h.host.count("pkill -f ceph-mon"), 2);
        assert_eq!(h.host.count("pkill -f ceph-osd"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_cluster_skips_local_daemons() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.remote_ceph = true;
        s.enable_rgw = true;
        s.remote_rgw = true;
        s.remote_rgw_url = Some("http://rgw.example.com:8080/swift/v1".into());
        let h = harness_with(dir, s, SimulatedConfig::default());

        let ctx = run(&h, &STACK_PHASES, RunContext::new(None)).await.unwrap();

        assert!(ctx.osd_ids.is_empty());
        assert!(!h.host.ran("mkfs.xfs"));
        assert!(!h.host.ran("systemctl start"));
        assert!(h.host.ran("apt-get install -y --no-install-recommends ceph-common"));
        assert!(h.cluster.pool("images").await.is_some());
        assert!(!h.cluster.has_identity("client.radosgw.node1").await);
        assert_eq!(
            h.catalog.service("swift").await.unwrap().endpoints.public,
            "http://rgw.example.com:8080/swift/v1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedded_gateway_and_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.enable_rgw = true;
        s.enable_manila = true;
        let h = harness_with(dir, s, SimulatedConfig::default());
        let cfg = h.orchestrator.cluster().clone();

        let ctx = run(&h, &STACK_PHASES, RunContext::new(None)).await.unwrap();

        assert!(h.cluster.has_identity("mds.node1").await);
        assert!(h.cluster.has_identity("client.radosgw.node1").await);
        assert!(gateway::instance_dir(&cfg).join("keyring").exists());
        assert!(h.host.ran("systemctl start ceph-mds@node1"));
        assert!(h.host.ran("systemctl start ceph-radosgw@radosgw.node1"));
        assert_eq!(
            h.catalog.service("swift").await.unwrap().endpoints.admin,
            "http://10.0.0.5:8080/swift/v1"
        );

        let status = h.orchestrator.status(&ctx);
        assert_eq!(status.backend, "simulated");
        assert!(status.consumers.contains(&Consumer::ObjectGateway));
        assert!(h.dir.path().exists());
    }

    #[test]
    fn test_plan_step() {
        use LifecyclePhase::*;
        assert_eq!(plan_step(Phase::Install, Uninstalled).unwrap(), Step::Run);
        assert_eq!(plan_step(Phase::Install, Running).unwrap(), Step::Skip);
        assert_eq!(plan_step(Phase::Configure, Stopped).unwrap(), Step::Skip);
        assert_eq!(plan_step(Phase::Init, Stopped).unwrap(), Step::Run);
        assert!(plan_step(Phase::Configure, CleanedUp).is_err());
        assert_eq!(plan_step(Phase::Install, CleanedUp).unwrap(), Step::Run);
    }
}
