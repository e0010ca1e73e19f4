//! Cluster Backend Adapters
//!
//! - CephCli: a real cluster through its command-line tools
//! - SimulatedCluster: in-memory cluster for dry runs and tests

pub mod ceph_cli;
pub mod simulated;

pub use ceph_cli::CephCli;
pub use simulated::{QuorumBehavior, SimulatedCluster, SimulatedConfig, SimulatedPool};

use crate::domain::ports::{ClusterAdminRef, HostAdapterRef};
use std::path::Path;
use std::sync::Arc;

/// Factory for cluster administration adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Adapter driving the cluster through its tools on `host`
    pub fn command_line(host: HostAdapterRef, conf_file: &Path) -> ClusterAdminRef {
        Arc::new(CephCli::new(host, conf_file))
    }

    pub fn simulated(config: SimulatedConfig) -> ClusterAdminRef {
        Arc::new(SimulatedCluster::new(config))
    }
}
