//! Host Command Runners
//!
//! [`LocalHost`] executes commands on the control host. [`DryRunHost`] records
//! them instead, optionally answering with canned output; it backs `--simulate`
//! runs and the unit tests.

use crate::domain::ports::{HostAdapter, HostCommand};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const PROC_MOUNTS: &str = "/proc/mounts";

// =============================================================================
// Local Host
// =============================================================================

/// Runs commands on this machine
pub struct LocalHost {
    use_sudo: bool,
}

impl LocalHost {
    /// `use_sudo` is false when the orchestrator already runs as root
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }
}

#[async_trait]
impl HostAdapter for LocalHost {
    async fn run(&self, command: &HostCommand) -> Result<String> {
        debug!("Running: {}", command.display());

        let mut cmd = if command.privileged && self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(&command.program);
            c
        } else {
            Command::new(&command.program)
        };
        cmd.args(&command.args);

        let output = cmd.output().await.map_err(|e| Error::CommandFailed {
            command: command.display(),
            status: -1,
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(Error::command(
                command.display(),
                output.status.code(),
                &output.stderr,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        let mounts = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        Ok(mount_table_contains(&mounts, path))
    }
}

fn mount_table_contains(mounts: &str, path: &Path) -> bool {
    let wanted = path.display().to_string();
    let wanted = wanted.trim_end_matches('/');
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mountpoint| mountpoint == wanted)
}

// =============================================================================
// Dry Run Host
// =============================================================================

struct CannedResponse {
    prefix: String,
    output: std::result::Result<String, String>,
}

/// Records commands instead of executing them
#[derive(Default)]
pub struct DryRunHost {
    commands: Mutex<Vec<HostCommand>>,
    responses: Mutex<Vec<CannedResponse>>,
    mounted: Mutex<HashSet<PathBuf>>,
}

fn command_line(command: &HostCommand) -> String {
    let mut line = command.program.clone();
    for arg in &command.args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl DryRunHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` (program and args joined by spaces)
    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.responses.lock().push(CannedResponse {
            prefix: prefix.to_string(),
            output: Ok(stdout.to_string()),
        });
    }

    /// Fail commands starting with `prefix`
    pub fn fail(&self, prefix: &str, stderr: &str) {
        self.responses.lock().push(CannedResponse {
            prefix: prefix.to_string(),
            output: Err(stderr.to_string()),
        });
    }

    /// Every recorded command as a single line, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.commands.lock().iter().map(command_line).collect()
    }

    pub fn commands(&self) -> Vec<HostCommand> {
        self.commands.lock().clone()
    }

    /// Number of recorded commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }
}

#[async_trait]
impl HostAdapter for DryRunHost {
    async fn run(&self, command: &HostCommand) -> Result<String> {
        info!("[dry-run] {}", command.display());
        self.commands.lock().push(command.clone());

        let line = command_line(command);
        match command.program.as_str() {
            "mount" => {
                if let Some(target) = command.args.last() {
                    self.mounted.lock().insert(PathBuf::from(target));
                }
            }
            "umount" => {
                if let Some(target) = command.args.last() {
                    self.mounted.lock().remove(Path::new(target));
                }
            }
            _ => {}
        }

        let responses = self.responses.lock();
        match responses.iter().rev().find(|r| line.starts_with(&r.prefix)) {
            Some(CannedResponse { output: Ok(out), .. }) => Ok(out.clone()),
            Some(CannedResponse {
                output: Err(stderr),
                ..
            }) => Err(Error::CommandFailed {
                command: command.display(),
                status: 1,
                stderr: stderr.clone(),
            }),
            None => Ok(String::new()),
        }
    }

    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        Ok(self.mounted.lock().contains(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_table_lookup() {
        let mounts = "sysfs /sys sysfs rw 0 0\n/dev/loop0 /var/lib/ceph xfs rw,noatime 0 0\n";
        assert!(mount_table_contains(mounts, Path::new("/var/lib/ceph")));
        assert!(mount_table_contains(mounts, Path::new("/var/lib/ceph/")));
        assert!(!mount_table_contains(mounts, Path::new("/var/lib")));
    }

    #[tokio::test]
    async fn test_dry_run_records_and_answers() {
        let host = DryRunHost::new();
        host.respond("ceph -v", "ceph version 9.2.1 (abc)");
        host.fail("umount", "not mounted");

        let out = host
            .run(&HostCommand::sudo("ceph").arg("-v"))
            .await
            .unwrap();
        assert!(out.starts_with("ceph version 9.2"));

        assert!(!host.run_best_effort(&HostCommand::sudo("umount").arg("/x")).await);
        assert_eq!(host.command_lines(), vec!["ceph -v", "umount /x"]);
    }

    #[tokio::test]
    async fn test_dry_run_tracks_mounts() {
        let host = DryRunHost::new();
        let target = Path::new("/var/lib/ceph");
        assert!(!host.is_mounted(target).await.unwrap());

        host.run(&HostCommand::sudo("mount").args(["-o", "loop", "/img", "/var/lib/ceph"]))
            .await
            .unwrap();
        assert!(host.is_mounted(target).await.unwrap());

        host.run(&HostCommand::sudo("umount").arg("/var/lib/ceph")).await.unwrap();
        assert!(!host.is_mounted(target).await.unwrap());
    }
}
