//! Version Gate
//!
//! Two release boundaries change what the orchestrator does:
//! - before 0.87 the cluster ships with `rbd`, `data` and `metadata` pools,
//!   from 0.87 on only `rbd`
//! - from 9.2 on the daemons run as the dedicated `ceph` user and the data
//!   directory must be handed to it

use crate::domain::model::CephVersion;
use serde::{Deserialize, Serialize};

/// Releases older than this ship the three legacy default pools
pub const LEGACY_POOLS_UNTIL: CephVersion = CephVersion::new(0, 87);

/// Releases at or above this run daemons as [`CEPH_USER`]
pub const DEDICATED_USER_FROM: CephVersion = CephVersion::new(9, 2);

/// Account the daemons run as on newer releases
pub const CEPH_USER: &str = "ceph";

/// Which side of the two boundaries a release falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseBucket {
    /// Three default pools, daemons run as root
    LegacyPools,
    /// Only `rbd` by default, daemons run as root
    RbdOnly,
    /// Only `rbd` by default, daemons run as `ceph`
    DedicatedUser,
}

impl ReleaseBucket {
    /// Pools the cluster creates on its own and which must be resized
    pub fn default_pools(&self) -> &'static [&'static str] {
        match self {
            ReleaseBucket::LegacyPools => &["rbd", "data", "metadata"],
            ReleaseBucket::RbdOnly | ReleaseBucket::DedicatedUser => &["rbd"],
        }
    }

    /// Whether the data directory must be owned by [`CEPH_USER`]
    pub fn owns_data_dir(&self) -> bool {
        *self == ReleaseBucket::DedicatedUser
    }
}

/// Classifies releases against the two boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGate {
    pub legacy_pools_until: CephVersion,
    pub dedicated_user_from: CephVersion,
}

impl Default for VersionGate {
    fn default() -> Self {
        Self {
            legacy_pools_until: LEGACY_POOLS_UNTIL,
            dedicated_user_from: DEDICATED_USER_FROM,
        }
    }
}

impl VersionGate {
    pub fn classify(&self, version: CephVersion) -> ReleaseBucket {
        if version < self.legacy_pools_until {
            ReleaseBucket::LegacyPools
        } else if version < self.dedicated_user_from {
            ReleaseBucket::RbdOnly
        } else {
            ReleaseBucket::DedicatedUser
        }
    }
}
