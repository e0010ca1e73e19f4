//! Platform Adapters
//!
//! - Keystone: the identity service catalog
//! - libvirt: hypervisor secrets

pub mod keystone;
pub mod libvirt;

pub use keystone::{InMemoryCatalog, KeystoneCatalog};
pub use libvirt::VirshSecrets;
