//! Configuration
//!
//! Settings surface, cluster topology resolution, and the `ceph.conf` document.

pub mod ceph_conf;
pub mod settings;

pub use ceph_conf::CephConf;
pub use settings::{parse_size, DeploySettings};
