//! devstack-ceph - Ceph Lifecycle Orchestrator
//!
//! Stands up an all-in-one Ceph cluster on a development host (or attaches to
//! an existing one) and provisions pools, credentials and catalog entries for
//! the OpenStack services that consume it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           Lifecycle Orchestrator                             │
//! │      install ──► configure ──► init ──► start ──► stop ──► cleanup           │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Version Gate   │  │ Readiness Gate  │  │   Consumer Provisioner      │  │
//! │  │ (release rules) │  │ (admin keyring) │  │ (pools, caps, keyrings)     │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │ Object Gateway  │  │    Teardown     │  │      Run Context            │  │
//! │  │  (radosgw)      │  │ (remote/local)  │  │   (JSON state file)         │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                          Cluster Backends                                    │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │     Ceph command line       │  │        Simulated cluster            │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        Platform Adapters                                     │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Keystone catalog (HTTP)   │  │     libvirt secrets (virsh)         │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Orchestrator, gates, provisioning and teardown
//! - [`config`]: Settings, topology resolution, `ceph.conf`
//! - [`host`]: OS detection, command execution, process supervisor
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod host;

// Re-export commonly used types
pub use controlplane::{
    Adapters, BackendFactory, KeystoneCatalog, InMemoryCatalog, Orchestrator, OrchestratorConfig,
    OrchestratorStatus, RunContext, RunStateStore, SimulatedConfig, VirshSecrets,
};

pub use config::{CephConf, DeploySettings};

pub use domain::model::{CephVersion, ClusterConfig, ClusterTopology, Consumer, LifecyclePhase, Phase};

pub use error::{Error, Recovery, Result};

pub use host::{Capabilities, DryRunHost, LocalHost};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
