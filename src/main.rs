//! devstack-ceph
//!
//! Command-line entry point. Each lifecycle phase is its own invocation; the
//! run context travels between invocations through the state file.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use devstack_ceph::controlplane::orchestrator::{plan_step, Step, STACK_PHASES};
use devstack_ceph::domain::ports::{CatalogRegistrarRef, ClusterAdminRef, HostAdapterRef, SecretStoreRef};
use devstack_ceph::host::{self, Distro, OsFamily};
use devstack_ceph::{
    Adapters, BackendFactory, Capabilities, CephConf, CephVersion, ClusterConfig, DeploySettings,
    DryRunHost, InMemoryCatalog, KeystoneCatalog, LifecyclePhase, LocalHost, Orchestrator,
    OrchestratorConfig, Phase, Recovery, Result, RunContext, RunStateStore, SimulatedConfig,
    VirshSecrets,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// devstack-ceph - Ceph lifecycle for a development cloud
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Drive an in-memory cluster and record host commands instead of running them
    #[arg(long, env = "CEPH_SIMULATE")]
    simulate: bool,

    /// Release reported by the simulated cluster
    #[arg(long, env = "CEPH_SIMULATE_VERSION", default_value = "10.2")]
    simulate_version: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Install packages and prepare the backing disk
    Install,
    /// Bootstrap or attach to the cluster and provision consumers
    Configure,
    /// Terminate stale daemons
    Init,
    /// Start the local daemons
    Start,
    /// Stop the local daemons
    Stop,
    /// Remove everything this tool created
    Cleanup,
    /// install, configure, init and start
    Stack,
    /// stop (when running) and cleanup
    Unstack,
    /// Print the persisted run context
    Status,
    /// Print the resolved ceph.conf
    RenderConf,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Configure => "configure",
            Command::Init => "init",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Cleanup => "cleanup",
            Command::Stack => "stack",
            Command::Unstack => "unstack",
            Command::Status => "status",
            Command::RenderConf => "render-conf",
        }
    }

    /// Whether the command changes the host
    fn is_mutating(&self) -> bool {
        !matches!(self, Command::Status | Command::RenderConf)
    }
}

/// Deployment settings, named after the devstack variables
#[derive(clap::Args, Debug)]
struct SettingsArgs {
    #[arg(long, env = "CEPH_DATA_DIR", default_value = "/var/lib/ceph")]
    data_dir: PathBuf,

    #[arg(long, env = "CEPH_CONF_DIR", default_value = "/etc/ceph")]
    conf_dir: PathBuf,

    #[arg(long, env = "CEPH_DISK_IMAGE", default_value = "/var/lib/ceph-drives/ceph.img")]
    disk_image: PathBuf,

    /// Loopback disk size, e.g. 8G
    #[arg(long, env = "CEPH_LOOPBACK_DISK_SIZE", default_value = "8G")]
    disk_size: String,

    #[arg(long, env = "CEPH_REPLICAS", default_value_t = 1)]
    replicas: u32,

    #[arg(long, env = "CEPH_RGW_PORT", default_value_t = 8080)]
    rgw_port: u16,

    /// Attach to an existing cluster instead of running one
    #[arg(long, env = "REMOTE_CEPH", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    remote_ceph: bool,

    #[arg(long, env = "REMOTE_CEPH_RGW", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    remote_rgw: bool,

    #[arg(long, env = "CEPH_REMOTE_RGW_URL")]
    remote_rgw_url: Option<String>,

    // Image store
    #[arg(long, env = "ENABLE_CEPH_GLANCE", action = ArgAction::Set, default_value_t = true, value_parser = BoolishValueParser::new())]
    enable_glance: bool,

    #[arg(long, env = "GLANCE_CEPH_POOL", default_value = "images")]
    glance_pool: String,

    #[arg(long, env = "GLANCE_CEPH_POOL_PG", default_value_t = 8)]
    glance_pool_pg: u32,

    #[arg(long, env = "GLANCE_CEPH_USER", default_value = "glance")]
    glance_user: String,

    // Compute
    #[arg(long, env = "ENABLE_CEPH_NOVA", action = ArgAction::Set, default_value_t = true, value_parser = BoolishValueParser::new())]
    enable_nova: bool,

    #[arg(long, env = "NOVA_CEPH_POOL", default_value = "vms")]
    nova_pool: String,

    #[arg(long, env = "NOVA_CEPH_POOL_PG", default_value_t = 8)]
    nova_pool_pg: u32,

    // Block store
    #[arg(long, env = "ENABLE_CEPH_CINDER", action = ArgAction::Set, default_value_t = true, value_parser = BoolishValueParser::new())]
    enable_cinder: bool,

    #[arg(long, env = "CINDER_CEPH_POOL", default_value = "volumes")]
    cinder_pool: String,

    #[arg(long, env = "CINDER_CEPH_POOL_PG", default_value_t = 8)]
    cinder_pool_pg: u32,

    #[arg(long, env = "CINDER_CEPH_USER", default_value = "cinder")]
    cinder_user: String,

    /// libvirt secret UUID; generated once per run when unset
    #[arg(long, env = "CINDER_CEPH_UUID")]
    cinder_uuid: Option<Uuid>,

    // Block backups
    #[arg(long, env = "ENABLE_CEPH_C_BAK", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    enable_cinder_backup: bool,

    #[arg(long, env = "CINDER_BAK_CEPH_POOL", default_value = "backups")]
    cinder_bak_pool: String,

    #[arg(long, env = "CINDER_BAK_CEPH_POOL_PG", default_value_t = 8)]
    cinder_bak_pool_pg: u32,

    #[arg(long, env = "CINDER_BAK_CEPH_USER", default_value = "cinder-bak")]
    cinder_bak_user: String,

    // Shared filesystem
    #[arg(long, env = "ENABLE_CEPH_MANILA", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    enable_manila: bool,

    #[arg(long, env = "MANILA_CEPH_USER", default_value = "manila")]
    manila_user: String,

    #[arg(long, env = "CEPHFS_FILESYSTEM", default_value = "cephfs")]
    cephfs_filesystem: String,

    #[arg(long, env = "CEPHFS_DATA_POOL", default_value = "cephfs_data")]
    cephfs_data_pool: String,

    #[arg(long, env = "CEPHFS_METADATA_POOL", default_value = "cephfs_metadata")]
    cephfs_metadata_pool: String,

    #[arg(long, env = "CEPHFS_POOL_PG", default_value_t = 8)]
    cephfs_pool_pg: u32,

    // Object gateway
    #[arg(long, env = "ENABLE_CEPH_RGW", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    enable_rgw: bool,

    // Host and identity
    /// Defaults to this machine's hostname
    #[arg(long = "node-name", env = "CEPH_HOSTNAME")]
    hostname: Option<String>,

    #[arg(long, env = "HOST_IP", default_value = "127.0.0.1")]
    host_ip: String,

    #[arg(long, env = "SERVICE_HOST", default_value = "127.0.0.1")]
    service_host: String,

    #[arg(long, env = "SERVICE_PROTOCOL", default_value = "http")]
    service_protocol: String,

    #[arg(long, env = "STACK_USER", default_value = "stack")]
    stack_user: String,

    #[arg(long, env = "KEYSTONE_AUTH_URI", default_value = "http://127.0.0.1/identity")]
    keystone_auth_uri: String,

    /// `sql` registers the gateway; `templated` skips registration
    #[arg(long, env = "KEYSTONE_CATALOG_BACKEND", default_value = "sql")]
    catalog_backend: String,

    #[arg(long, env = "SERVICE_TOKEN", default_value = "", hide_env_values = true)]
    service_token: String,

    #[arg(long, env = "KEYSTONE_CA_CERT", default_value = "/etc/keystone/ssl/certs/ca.pem")]
    keystone_ca_cert: PathBuf,

    #[arg(long, env = "REGION_NAME", default_value = "RegionOne")]
    region: String,

    // Safety switches
    #[arg(long, env = "FORCE_CEPH_INSTALL", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    force_install: bool,

    /// Allow deleting pools on a remote cluster during cleanup
    #[arg(long, env = "CEPH_CONFIRM_POOL_DELETE", action = ArgAction::Set, default_value_t = false, value_parser = BoolishValueParser::new())]
    confirm_pool_delete: bool,

    #[arg(long, env = "CEPH_STATE_FILE", default_value = "/var/lib/devstack-ceph/run-state.json")]
    state_file: PathBuf,
}

impl SettingsArgs {
    fn into_settings(self) -> DeploySettings {
        DeploySettings {
            data_dir: self.data_dir,
            conf_dir: self.conf_dir,
            disk_image: self.disk_image,
            disk_size: self.disk_size,
            replicas: self.replicas,
            rgw_port: self.rgw_port,
            remote_ceph: self.remote_ceph,
            remote_rgw: self.remote_rgw,
            remote_rgw_url: self.remote_rgw_url,
            enable_glance: self.enable_glance,
            glance_pool: self.glance_pool,
            glance_pool_pg: self.glance_pool_pg,
            glance_user: self.glance_user,
            enable_nova: self.enable_nova,
            nova_pool: self.nova_pool,
            nova_pool_pg: self.nova_pool_pg,
            enable_cinder: self.enable_cinder,
            cinder_pool: self.cinder_pool,
            cinder_pool_pg: self.cinder_pool_pg,
            cinder_user: self.cinder_user,
            cinder_uuid: self.cinder_uuid,
            enable_cinder_backup: self.enable_cinder_backup,
            cinder_bak_pool: self.cinder_bak_pool,
            cinder_bak_pool_pg: self.cinder_bak_pool_pg,
            cinder_bak_user: self.cinder_bak_user,
            enable_manila: self.enable_manila,
            manila_user: self.manila_user,
            cephfs_filesystem: self.cephfs_filesystem,
            cephfs_data_pool: self.cephfs_data_pool,
            cephfs_metadata_pool: self.cephfs_metadata_pool,
            cephfs_pool_pg: self.cephfs_pool_pg,
            enable_rgw: self.enable_rgw,
            hostname: self.hostname.unwrap_or_else(host::detect_hostname),
            host_ip: self.host_ip,
            service_host: self.service_host,
            service_protocol: self.service_protocol,
            stack_user: self.stack_user,
            keystone_auth_uri: self.keystone_auth_uri,
            catalog_backend: self.catalog_backend,
            service_token: self.service_token,
            keystone_ca_cert: self.keystone_ca_cert,
            region: self.region,
            force_install: self.force_install,
            confirm_pool_delete: self.confirm_pool_delete,
            state_file: self.state_file,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            let hint = match err.recovery() {
                Recovery::RerunPhase => "fix the cause above and rerun the same command",
                Recovery::FixConfiguration => "correct the settings and rerun the same command",
                Recovery::Abort => "run `devstack-ceph cleanup` and start over",
            };
            eprintln!("devstack-ceph: {}: {}", err, hint);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let command = args.command;
    let settings = args.settings.into_settings();

    info!("devstack-ceph {} ({})", devstack_ceph::VERSION, command.name());

    if command.is_mutating() && !args.simulate {
        host::require_root(command.name(), host::effective_uid())?;
    }

    let store = RunStateStore::new(&settings.state_file);
    let ctx = match store.load().await? {
        Some(ctx) => ctx,
        None if matches!(command, Command::Cleanup | Command::Unstack) => {
            warn!(
                "No run state at {}; cleaning up without a recorded run",
                store.path().display()
            );
            RunContext::orphaned(settings.cinder_uuid)
        }
        None => RunContext::new(settings.cinder_uuid),
    };

    let cluster = ClusterConfig::resolve(&settings, ctx.fsid)?;

    if command == Command::RenderConf {
        print!("{}", CephConf::for_cluster(&cluster).render());
        return Ok(());
    }

    let capabilities = detect_capabilities(args.simulate).await?;
    let adapters = build_adapters(args.simulate, &args.simulate_version, &cluster).await?;
    let orchestrator = Orchestrator::new(OrchestratorConfig::default(), cluster, capabilities, adapters);

    if command == Command::Status {
        println!("{}", serde_json::to_string_pretty(&orchestrator.status(&ctx))?);
        return Ok(());
    }

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling");
            token.cancel();
        }
    });

    let phases: Vec<Phase> = match command {
        Command::Install => vec![Phase::Install],
        Command::Configure => vec![Phase::Configure],
        Command::Init => vec![Phase::Init],
        Command::Start => vec![Phase::Start],
        Command::Stop => vec![Phase::Stop],
        Command::Cleanup => vec![Phase::Cleanup],
        Command::Stack => STACK_PHASES.to_vec(),
        Command::Unstack if ctx.phase == LifecyclePhase::Running => vec![Phase::Stop, Phase::Cleanup],
        Command::Unstack => vec![Phase::Cleanup],
        Command::Status | Command::RenderConf => Vec::new(),
    };

    let mut ctx = ctx;
    for phase in phases {
        if command == Command::Stack && plan_step(phase, ctx.phase)? == Step::Skip {
            info!("Skipping {}; cluster is already {}", phase, ctx.phase);
            continue;
        }

        ctx = orchestrator.run_phase(phase, ctx).await?;
        if ctx.phase == LifecyclePhase::CleanedUp {
            store.remove().await?;
        } else {
            store.save(&ctx).await?;
        }
    }

    Ok(())
}

// =============================================================================
// Wiring
// =============================================================================

async fn detect_capabilities(simulate: bool) -> Result<Capabilities> {
    match Capabilities::detect().await {
        Ok(caps) => Ok(caps),
        Err(err) if simulate => {
            warn!("OS detection failed ({}); simulating Ubuntu jammy", err);
            Ok(Capabilities::from_distro(Distro {
                family: OsFamily::Ubuntu,
                id: "ubuntu".to_string(),
                version_id: "22.04".to_string(),
                codename: Some("jammy".to_string()),
            }))
        }
        Err(err) => Err(err),
    }
}

async fn build_adapters(
    simulate: bool,
    simulate_version: &str,
    cluster: &ClusterConfig,
) -> Result<Adapters> {
    let (host, admin, catalog): (HostAdapterRef, ClusterAdminRef, CatalogRegistrarRef) = if simulate {
        let version = CephVersion::parse(simulate_version)?;
        info!("Simulating a {} cluster; host commands are recorded, not run", version);
        let host: HostAdapterRef = Arc::new(DryRunHost::new());
        let catalog: CatalogRegistrarRef = Arc::new(InMemoryCatalog::new());
        (host, BackendFactory::simulated(SimulatedConfig::with_version(version)), catalog)
    } else {
        // Mutating commands already run as root
        let host: HostAdapterRef = Arc::new(LocalHost::new(host::effective_uid() != 0));
        let admin = BackendFactory::command_line(host.clone(), &cluster.conf_file());
        let catalog: CatalogRegistrarRef = Arc::new(KeystoneCatalog::connect(&cluster.identity).await?);
        (host, admin, catalog)
    };

    let secrets: SecretStoreRef = Arc::new(VirshSecrets::new(host.clone(), std::env::temp_dir()));

    Ok(Adapters {
        admin,
        host,
        catalog,
        secrets,
    })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so `status` and `render-conf` output stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
