//! Operating System Detection
//!
//! Reads `/etc/os-release` once and turns it into a [`Capabilities`]
//! descriptor. Everything downstream dispatches on these enums instead of
//! matching distribution strings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

const OS_RELEASE: &str = "/etc/os-release";

const UBUNTU_RELEASES: &[&str] = &["trusty", "xenial", "bionic", "focal", "jammy"];
const DEBIAN_RELEASES: &[&str] = &["jessie", "stretch", "buster", "bullseye", "bookworm", "sid"];

// =============================================================================
// Distribution
// =============================================================================

/// Distribution family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Ubuntu,
    Debian,
    Fedora,
    /// RHEL and rebuilds (CentOS, Rocky, Alma)
    Rhel,
    Other,
}

/// Parsed `/etc/os-release`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distro {
    pub family: OsFamily,
    pub id: String,
    pub version_id: String,
    pub codename: Option<String>,
}

impl Distro {
    pub fn parse_os_release(text: &str) -> Self {
        let mut id = String::new();
        let mut id_like = String::new();
        let mut version_id = String::new();
        let mut codename = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "ID" => id = value.to_lowercase(),
                "ID_LIKE" => id_like = value.to_lowercase(),
                "VERSION_ID" => version_id = value,
                "VERSION_CODENAME" | "UBUNTU_CODENAME" if !value.is_empty() => {
                    codename.get_or_insert(value.to_lowercase());
                }
                _ => {}
            }
        }

        let family = match id.as_str() {
            "ubuntu" => OsFamily::Ubuntu,
            "debian" => OsFamily::Debian,
            "fedora" => OsFamily::Fedora,
            "rhel" | "centos" | "rocky" | "almalinux" => OsFamily::Rhel,
            _ if id_like.split_whitespace().any(|l| l == "rhel") => OsFamily::Rhel,
            _ => OsFamily::Other,
        };

        // Debian testing has no VERSION_ID
        if family == OsFamily::Debian && codename.is_none() && version_id.is_empty() {
            codename = Some("sid".to_string());
        }

        Self {
            family,
            id,
            version_id,
            codename,
        }
    }

    pub async fn detect() -> Result<Self> {
        Self::detect_from(Path::new(OS_RELEASE)).await
    }

    pub async fn detect_from(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse_os_release(&text))
    }

    fn major_version(&self) -> Option<u32> {
        self.version_id.split('.').next().and_then(|v| v.parse().ok())
    }

    fn is_supported(&self) -> bool {
        let codename = self.codename.as_deref().unwrap_or("");
        match self.family {
            OsFamily::Ubuntu => UBUNTU_RELEASES.contains(&codename),
            OsFamily::Debian => DEBIAN_RELEASES.contains(&codename),
            OsFamily::Fedora => self.major_version().map(|v| v >= 22).unwrap_or(false),
            OsFamily::Rhel => self.major_version().map(|v| v >= 7).unwrap_or(false),
            OsFamily::Other => false,
        }
    }

    pub fn label(&self) -> String {
        match &self.codename {
            Some(codename) => format!("{} {} ({})", self.id, self.version_id, codename),
            None => format!("{} {}", self.id, self.version_id),
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Process supervisor flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    Upstart,
    Sysvinit,
    Systemd,
}

impl InitSystem {
    /// Marker file the supervisor looks for in each daemon directory
    pub fn marker_name(&self) -> &'static str {
        match self {
            InitSystem::Upstart => "upstart",
            InitSystem::Sysvinit => "sysvinit",
            InitSystem::Systemd => "systemd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
}

/// What this host can do, computed once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub distro: Distro,
    pub init: InitSystem,
    pub packages: PackageManager,
    pub supported: bool,
}

impl Capabilities {
    pub fn from_distro(distro: Distro) -> Self {
        let init = match (distro.family, distro.codename.as_deref()) {
            (OsFamily::Ubuntu, Some("trusty")) => InitSystem::Upstart,
            (OsFamily::Fedora, _) | (OsFamily::Rhel, _) => InitSystem::Sysvinit,
            _ => InitSystem::Systemd,
        };

        let packages = match distro.family {
            OsFamily::Ubuntu | OsFamily::Debian | OsFamily::Other => PackageManager::Apt,
            OsFamily::Fedora => PackageManager::Dnf,
            OsFamily::Rhel => {
                if distro.major_version().map(|v| v >= 8).unwrap_or(false) {
                    PackageManager::Dnf
                } else {
                    PackageManager::Yum
                }
            }
        };

        Self {
            supported: distro.is_supported(),
            distro,
            init,
            packages,
        }
    }

    pub async fn detect() -> Result<Self> {
        let caps = Self::from_distro(Distro::detect().await?);
        info!(
            "Detected {} (init: {:?}, packages: {:?})",
            caps.distro.label(),
            caps.init,
            caps.packages
        );
        Ok(caps)
    }

    /// Fail unless the distribution is supported or the operator forced it
    pub fn ensure_supported(&self, force: bool) -> Result<()> {
        if self.supported {
            return Ok(());
        }
        if force {
            warn!(
                "{} is not a supported distribution, continuing because FORCE_CEPH_INSTALL is set",
                self.distro.label()
            );
            return Ok(());
        }
        Err(Error::UnsupportedPlatform {
            distro: self.distro.label(),
        })
    }

    /// Packages for the cluster daemons and tools
    pub fn server_packages(&self, with_gateway: bool, with_mds: bool) -> Vec<&'static str> {
        let mut pkgs = vec!["ceph", "xfsprogs"];
        match self.packages {
            PackageManager::Apt => {
                pkgs.push("libnss3-tools");
                if with_gateway {
                    pkgs.push("radosgw");
                }
                if with_mds {
                    pkgs.push("ceph-mds");
                }
            }
            PackageManager::Dnf | PackageManager::Yum => {
                pkgs.push("nss-tools");
                if with_gateway {
                    pkgs.push("ceph-radosgw");
                }
            }
        }
        pkgs
    }

    /// Packages needed to talk to a remote cluster
    pub fn client_packages(&self) -> Vec<&'static str> {
        vec!["ceph-common"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const XENIAL: &str = "NAME=\"Ubuntu\"\nVERSION=\"16.04.7 LTS (Xenial Xerus)\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"16.04\"\nVERSION_CODENAME=xenial\nUBUNTU_CODENAME=xenial\n";
    const TRUSTY: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"14.04\"\nUBUNTU_CODENAME=trusty\n";
    const CENTOS7: &str = "NAME=\"CentOS Linux\"\nID=\"centos\"\nID_LIKE=\"rhel fedora\"\nVERSION_ID=\"7\"\n";
    const ARCH: &str = "NAME=\"Arch Linux\"\nID=arch\n";

    #[test]
    fn test_parse_ubuntu() {
        let distro = Distro::parse_os_release(XENIAL);
        assert_eq!(distro.family, OsFamily::Ubuntu);
        assert_eq!(distro.codename.as_deref(), Some("xenial"));
        assert_eq!(distro.version_id, "16.04");
    }

    #[test]
    fn test_init_system_selection() {
        let trusty = Capabilities::from_distro(Distro::parse_os_release(TRUSTY));
        assert_eq!(trusty.init, InitSystem::Upstart);

        let xenial = Capabilities::from_distro(Distro::parse_os_release(XENIAL));
        assert_eq!(xenial.init, InitSystem::Systemd);

        let centos = Capabilities::from_distro(Distro::parse_os_release(CENTOS7));
        assert_eq!(centos.init, InitSystem::Sysvinit);
        assert_eq!(centos.packages, PackageManager::Yum);
        assert!(centos.supported);
    }

    #[test]
    fn test_unsupported_requires_force() {
        let arch = Capabilities::from_distro(Distro::parse_os_release(ARCH));
        assert!(!arch.supported);
        assert_matches!(
            arch.ensure_supported(false),
            Err(Error::UnsupportedPlatform { .. })
        );
        assert!(arch.ensure_supported(true).is_ok());
    }

    #[test]
    fn test_package_sets() {
        let xenial = Capabilities::from_distro(Distro::parse_os_release(XENIAL));
        let pkgs = xenial.server_packages(true, true);
        assert!(pkgs.contains(&"radosgw"));
        assert!(pkgs.contains(&"ceph-mds"));

        let centos = Capabilities::from_distro(Distro::parse_os_release(CENTOS7));
        assert!(centos.server_packages(true, false).contains(&"ceph-radosgw"));
        assert_eq!(centos.client_packages(), vec!["ceph-common"]);
    }
}
