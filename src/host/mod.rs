//! Control Host Integration
//!
//! OS detection, command execution, and the process supervisor.

pub mod command;
pub mod os;
pub mod supervisor;

pub use command::{DryRunHost, LocalHost};
pub use os::{Capabilities, Distro, InitSystem, OsFamily, PackageManager};
pub use supervisor::{Daemon, ServiceSupervisor};

use crate::domain::ports::{HostAdapter, HostCommand};
use crate::error::{Error, Result};
use std::path::Path;

/// Install packages with the host's package manager
pub async fn install_packages(
    host: &dyn HostAdapter,
    manager: PackageManager,
    packages: &[&str],
) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    let cmd = match manager {
        PackageManager::Apt => HostCommand::sudo("apt-get").args(["install", "-y", "--no-install-recommends"]),
        PackageManager::Dnf => HostCommand::sudo("dnf").args(["install", "-y"]),
        PackageManager::Yum => HostCommand::sudo("yum").args(["install", "-y"]),
    };
    host.run(&cmd.args(packages.iter().copied())).await?;
    Ok(())
}

/// Recursively hand a path to `owner`
pub async fn chown_recursive(host: &dyn HostAdapter, path: &Path, owner: &str) -> Result<()> {
    host.run(
        &HostCommand::sudo("chown")
            .arg("-R")
            .arg(format!("{}:{}", owner, owner))
            .path_arg(path),
    )
    .await?;
    Ok(())
}

/// Hand a single file to `owner`
pub async fn chown(host: &dyn HostAdapter, path: &Path, owner: &str) -> Result<()> {
    host.run(
        &HostCommand::sudo("chown")
            .arg(format!("{}:{}", owner, owner))
            .path_arg(path),
    )
    .await?;
    Ok(())
}

/// Effective uid of this process
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

/// Fail unless `uid` is root
pub fn require_root(command: &str, uid: u32) -> Result<()> {
    if uid == 0 {
        return Ok(());
    }
    Err(Error::NotPrivileged {
        command: command.to_string(),
        uid,
    })
}

/// Look up this machine's hostname
pub fn detect_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| std::fs::read_to_string("/etc/hostname"))
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
