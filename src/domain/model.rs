//! Domain Model - Cluster topology, consumers, pools and credentials
//!
//! Everything here is resolved once from the deployment settings and is
//! read-only for the rest of the run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// =============================================================================
// Consumers
// =============================================================================

/// A service that stores its data in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Consumer {
    /// Image store (Glance)
    ImageStore,
    /// Block store (Cinder)
    BlockStore,
    /// Block store backups (Cinder backup)
    BlockBackup,
    /// Compute ephemeral disks (Nova)
    Compute,
    /// Shared filesystem (Manila over CephFS)
    SharedFilesystem,
    /// Object gateway (RADOS gateway)
    ObjectGateway,
}

impl Consumer {
    /// Provisioning order. Credential owners come before the consumers that share them.
    pub const ALL: [Consumer; 6] = [
        Consumer::ImageStore,
        Consumer::BlockStore,
        Consumer::BlockBackup,
        Consumer::Compute,
        Consumer::SharedFilesystem,
        Consumer::ObjectGateway,
    ];

    /// Service name used for logging and the enable switches
    pub fn service_name(&self) -> &'static str {
        match self {
            Consumer::ImageStore => "glance",
            Consumer::BlockStore => "cinder",
            Consumer::BlockBackup => "cinder-backup",
            Consumer::Compute => "nova",
            Consumer::SharedFilesystem => "manila",
            Consumer::ObjectGateway => "rgw",
        }
    }
}

impl std::fmt::Display for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Consumer::ImageStore => write!(f, "image-store"),
            Consumer::BlockStore => write!(f, "block-store"),
            Consumer::BlockBackup => write!(f, "block-backup"),
            Consumer::Compute => write!(f, "compute"),
            Consumer::SharedFilesystem => write!(f, "shared-filesystem"),
            Consumer::ObjectGateway => write!(f, "object-gateway"),
        }
    }
}

// =============================================================================
// Placement
// =============================================================================

/// Placement rule that puts each replica on a distinct OSD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrushRule {
    pub name: String,
    pub id: u32,
}

/// Name of the placement rule created for multi-replica clusters
pub const CRUSH_RULE_NAME: &str = "devstack";

/// A pool owned by one consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub pg_num: u32,
    /// Always equal to the cluster replica count
    pub size: u32,
    pub crush_rule: Option<CrushRule>,
}

impl PoolSpec {
    pub fn new(name: impl Into<String>, pg_num: u32, replicas: u32) -> Self {
        Self {
            name: name.into(),
            pg_num,
            size: replicas,
            crush_rule: None,
        }
    }

    /// Attach the shared placement rule
    pub fn with_rule(mut self, rule: Option<&CrushRule>) -> Self {
        self.crush_rule = rule.cloned();
        self
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Capability grants for one cluster identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caps {
    pub mon: String,
    pub osd: Option<String>,
    pub mds: Option<String>,
}

impl Caps {
    pub fn new(mon: impl Into<String>) -> Self {
        Self {
            mon: mon.into(),
            osd: None,
            mds: None,
        }
    }

    pub fn osd(mut self, grant: impl Into<String>) -> Self {
        self.osd = Some(grant.into());
        self
    }

    pub fn mds(mut self, grant: impl Into<String>) -> Self {
        self.mds = Some(grant.into());
        self
    }

    /// Flatten into `auth get-or-create` arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["mon".to_string(), self.mon.clone()];
        if let Some(osd) = &self.osd {
            args.push("osd".to_string());
            args.push(osd.clone());
        }
        if let Some(mds) = &self.mds {
            args.push("mds".to_string());
            args.push(mds.clone());
        }
        args
    }
}

/// A capability-scoped identity and where its keyring lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Full entity name, e.g. `client.glance`
    pub entity: String,
    pub caps: Caps,
    pub keyring: PathBuf,
}

impl Credential {
    /// Client credential persisted under the configuration directory
    pub fn client(user: &str, caps: Caps, conf_dir: &Path) -> Self {
        Self {
            entity: format!("client.{}", user),
            caps,
            keyring: conf_dir.join(format!("ceph.client.{}.keyring", user)),
        }
    }
}

/// How a consumer obtains its credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialRef {
    /// The consumer mints its own credential
    Owned(Credential),
    /// The consumer reuses another consumer's credential verbatim
    Shared { owner: Consumer, entity: String },
}

impl CredentialRef {
    pub fn entity(&self) -> &str {
        match self {
            CredentialRef::Owned(c) => &c.entity,
            CredentialRef::Shared { entity, .. } => entity,
        }
    }
}

/// A consumer, whether it is enabled, and the resources it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerBinding {
    pub consumer: Consumer,
    pub enabled: bool,
    pub pools: Vec<PoolSpec>,
    pub credential: CredentialRef,
}

// =============================================================================
// Topology
// =============================================================================

/// Where the cluster runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterTopology {
    /// Single-host cluster created and owned by this run
    Embedded,
    /// Pre-existing cluster owned by someone else
    Remote,
}

/// Where the object gateway runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayTopology {
    Embedded { port: u16 },
    /// The URL is checked when the gateway is provisioned
    Remote { url: Option<String> },
}

/// Identity catalog backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    Sql,
    Templated,
}

/// Identity service settings used by the object gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub auth_uri: String,
    pub admin_token: String,
    pub ca_cert: PathBuf,
    pub catalog_backend: CatalogBackend,
    pub service_host: String,
    pub service_protocol: String,
    pub region: String,
}

// =============================================================================
// Cluster Configuration
// =============================================================================

/// Resolved cluster topology; immutable after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub fsid: Uuid,
    pub replicas: u32,
    pub hostname: String,
    pub host_ip: String,
    pub data_dir: PathBuf,
    pub conf_dir: PathBuf,
    pub disk_image: PathBuf,
    pub disk_size_bytes: u64,
    pub cluster: ClusterTopology,
    pub gateway: GatewayTopology,
    pub filesystem: String,
    pub stack_user: String,
    pub identity: IdentitySettings,
    pub bindings: Vec<ConsumerBinding>,
    pub force_install: bool,
    pub confirm_pool_delete: bool,
}

impl ClusterConfig {
    pub fn conf_file(&self) -> PathBuf {
        self.conf_dir.join("ceph.conf")
    }

    /// Written by the cluster once the monitor reaches quorum
    pub fn admin_keyring(&self) -> PathBuf {
        self.conf_dir.join("ceph.client.admin.keyring")
    }

    pub fn is_embedded(&self) -> bool {
        self.cluster == ClusterTopology::Embedded
    }

    pub fn binding(&self, consumer: Consumer) -> Option<&ConsumerBinding> {
        self.bindings.iter().find(|b| b.consumer == consumer)
    }

    pub fn is_enabled(&self, consumer: Consumer) -> bool {
        self.binding(consumer).map(|b| b.enabled).unwrap_or(false)
    }

    /// Enabled bindings in provisioning order
    pub fn enabled_bindings(&self) -> impl Iterator<Item = &ConsumerBinding> {
        self.bindings.iter().filter(|b| b.enabled)
    }

    /// Whether a hypervisor needs a secret to reach the cluster
    pub fn needs_hypervisor_secret(&self) -> bool {
        self.is_enabled(Consumer::Compute) || self.is_enabled(Consumer::BlockStore)
    }

    /// Whether the gateway daemon runs on this host
    pub fn runs_local_gateway(&self) -> bool {
        self.is_enabled(Consumer::ObjectGateway)
            && matches!(self.gateway, GatewayTopology::Embedded { .. })
    }
}

// =============================================================================
// Versions
// =============================================================================

/// Cluster release as `major.minor`, compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CephVersion {
    pub major: u32,
    pub minor: u32,
}

impl CephVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the first `major.minor` out of a version string.
    ///
    /// Accepts `9.2`, `9.2.1`, `ceph version 0.80.11 (8424145d...)` and
    /// `16.2.7-1focal`.
    pub fn parse(raw: &str) -> Result<Self, crate::error::Error> {
        let token = raw
            .split_whitespace()
            .find(|t| t.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| crate::error::Error::InvalidVersion(raw.to_string()))?;

        let mut parts = token.split(|c: char| !c.is_ascii_digit());
        let major = parts.next().and_then(|p| p.parse().ok());
        let minor = parts.next().and_then(|p| p.parse().ok());

        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Err(crate::error::Error::InvalidVersion(raw.to_string())),
        }
    }
}

impl std::fmt::Display for CephVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// State of the run, in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Uninstalled,
    Installed,
    Configured,
    Initialized,
    Running,
    Stopped,
    CleanedUp,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecyclePhase::Uninstalled => "uninstalled",
            LifecyclePhase::Installed => "installed",
            LifecyclePhase::Configured => "configured",
            LifecyclePhase::Initialized => "initialized",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Stopped => "stopped",
            LifecyclePhase::CleanedUp => "cleaned-up",
        };
        write!(f, "{}", name)
    }
}

/// A lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Install,
    Configure,
    Init,
    Start,
    Stop,
    Cleanup,
}

impl Phase {
    /// State reached when the phase succeeds
    pub fn target(&self) -> LifecyclePhase {
        match self {
            Phase::Install => LifecyclePhase::Installed,
            Phase::Configure => LifecyclePhase::Configured,
            Phase::Init => LifecyclePhase::Initialized,
            Phase::Start => LifecyclePhase::Running,
            Phase::Stop => LifecyclePhase::Stopped,
            Phase::Cleanup => LifecyclePhase::CleanedUp,
        }
    }

    /// Whether the phase may run from `current`.
    ///
    /// Every phase may be re-invoked from its own target state. `init` may also
    /// run from `Running` or `Stopped` to clear stale daemons, and cleanup may
    /// run from any state.
    pub fn allowed_from(&self, current: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        if current == self.target() {
            return true;
        }
        match self {
            Phase::Install => matches!(current, Uninstalled | CleanedUp),
            Phase::Configure => current == Installed,
            Phase::Init => matches!(current, Configured | Running | Stopped),
            Phase::Start => current == Initialized,
            Phase::Stop => current == Running,
            Phase::Cleanup => true,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Install => "install",
            Phase::Configure => "configure",
            Phase::Init => "init",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Cleanup => "cleanup",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_args() {
        let caps = Caps::new("allow r").osd("allow rwx pool=images");
        assert_eq!(
            caps.to_args(),
            vec!["mon", "allow r", "osd", "allow rwx pool=images"]
        );

        let caps = Caps::new("allow profile mds").osd("allow rw").mds("allow");
        assert_eq!(caps.to_args().len(), 6);
    }

    #[test]
    fn test_client_credential_paths() {
        let cred = Credential::client("glance", Caps::new("allow r"), Path::new("/etc/ceph"));
        assert_eq!(cred.entity, "client.glance");
        assert_eq!(cred.keyring, PathBuf::from("/etc/ceph/ceph.client.glance.keyring"));
    }

    #[test]
    fn test_phase_transitions_forward_only() {
        use LifecyclePhase::*;
        assert!(Phase::Install.allowed_from(Uninstalled));
        assert!(Phase::Install.allowed_from(Installed));
        assert!(!Phase::Install.allowed_from(Running));
        assert!(Phase::Configure.allowed_from(Installed));
        assert!(!Phase::Configure.allowed_from(Uninstalled));
        assert!(!Phase::Start.allowed_from(Configured));
        assert!(!Phase::Stop.allowed_from(Initialized));
    }

    #[test]
    fn test_init_recovers_from_running_and_stopped() {
        use LifecyclePhase::*;
        assert!(Phase::Init.allowed_from(Configured));
        assert!(Phase::Init.allowed_from(Running));
        assert!(Phase::Init.allowed_from(Stopped));
        assert!(!Phase::Init.allowed_from(Installed));
    }

    #[test]
    fn test_cleanup_from_any_state() {
        use LifecyclePhase::*;
        for state in [Uninstalled, Installed, Configured, Initialized, Running, Stopped, CleanedUp] {
            assert!(Phase::Cleanup.allowed_from(state));
        }
    }

    #[test]
    fn test_version_parse_and_numeric_order() {
        assert_eq!(CephVersion::parse("9.2").unwrap(), CephVersion::new(9, 2));
        assert_eq!(
            CephVersion::parse("ceph version 0.80.11 (8424145d49264624a3b0a204aedb127835161070)").unwrap(),
            CephVersion::new(0, 80)
        );
        assert_eq!(CephVersion::parse("16.2.7-1focal").unwrap(), CephVersion::new(16, 2));
        assert!(CephVersion::parse("ceph version unknown").is_err());

        // 0.87 > 0.80 and 10.2 > 9.2 numerically, not lexicographically
        assert!(CephVersion::new(0, 87) > CephVersion::new(0, 80));
        assert!(CephVersion::new(10, 2) > CephVersion::new(9, 2));
        assert!(CephVersion::new(9, 10) > CephVersion::new(9, 2));
    }
}
