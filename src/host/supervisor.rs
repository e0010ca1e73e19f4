//! Process Supervisor Integration
//!
//! Start and stop signals for the cluster daemons, and the marker files the
//! supervisor inspects to pick a per-instance startup script.

use crate::domain::ports::{HostAdapterRef, HostCommand};
use crate::error::Result;
use crate::host::os::InitSystem;
use std::path::Path;
use tracing::{debug, info};

/// A daemon instance managed by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Daemon {
    Monitor(String),
    Osd(u32),
    Metadata(String),
    /// Gateway instance name, e.g. `radosgw.node1`
    Gateway(String),
}

impl Daemon {
    /// Process name as seen by `pkill`/`killall`
    pub fn process_name(&self) -> &'static str {
        match self {
            Daemon::Monitor(_) => "ceph-mon",
            Daemon::Osd(_) => "ceph-osd",
            Daemon::Metadata(_) => "ceph-mds",
            Daemon::Gateway(_) => "radosgw",
        }
    }
}

/// Sends start/stop signals through the host's init system
pub struct ServiceSupervisor {
    host: HostAdapterRef,
    init: InitSystem,
}

impl ServiceSupervisor {
    pub fn new(host: HostAdapterRef, init: InitSystem) -> Self {
        Self { host, init }
    }

    pub fn init_system(&self) -> InitSystem {
        self.init
    }

    pub fn start_command(&self, daemon: &Daemon) -> HostCommand {
        match self.init {
            InitSystem::Upstart => match daemon {
                Daemon::Monitor(id) => HostCommand::sudo("initctl")
                    .args(["emit", "ceph-mon"])
                    .arg(format!("id={}", id)),
                Daemon::Osd(id) => HostCommand::sudo("start")
                    .arg("ceph-osd")
                    .arg(format!("id={}", id)),
                Daemon::Metadata(id) => HostCommand::sudo("start")
                    .arg("ceph-mds")
                    .arg(format!("id={}", id)),
                Daemon::Gateway(id) => HostCommand::sudo("start")
                    .arg("radosgw")
                    .arg(format!("id={}", id)),
            },
            InitSystem::Sysvinit => match daemon {
                Daemon::Monitor(id) => HostCommand::sudo("service")
                    .args(["ceph", "start"])
                    .arg(format!("mon.{}", id)),
                Daemon::Osd(id) => HostCommand::sudo("service")
                    .args(["ceph", "start"])
                    .arg(format!("osd.{}", id)),
                Daemon::Metadata(id) => HostCommand::sudo("service")
                    .args(["ceph", "start"])
                    .arg(format!("mds.{}", id)),
                Daemon::Gateway(_) => HostCommand::sudo("service").args(["radosgw", "start"]),
            },
            InitSystem::Systemd => {
                let unit = match daemon {
                    Daemon::Monitor(id) => format!("ceph-mon@{}", id),
                    Daemon::Osd(id) => format!("ceph-osd@{}", id),
                    Daemon::Metadata(id) => format!("ceph-mds@{}", id),
                    Daemon::Gateway(id) => format!("ceph-radosgw@{}", id),
                };
                HostCommand::sudo("systemctl").arg("start").arg(unit)
            }
        }
    }

    pub fn stop_command(&self, daemon: &Daemon) -> HostCommand {
        match self.init {
            InitSystem::Upstart => {
                let job = match daemon {
                    Daemon::Monitor(_) => "ceph-mon-all",
                    Daemon::Osd(_) => "ceph-osd-all",
                    Daemon::Metadata(_) => "ceph-mds-all",
                    Daemon::Gateway(_) => "radosgw-all",
                };
                HostCommand::sudo("stop").arg(job)
            }
            InitSystem::Sysvinit => match daemon {
                Daemon::Gateway(_) => HostCommand::sudo("service").args(["radosgw", "stop"]),
                _ => HostCommand::sudo("service").args(["ceph", "stop"]),
            },
            InitSystem::Systemd => {
                let target = match daemon {
                    Daemon::Monitor(_) => "ceph-mon.target",
                    Daemon::Osd(_) => "ceph-osd.target",
                    Daemon::Metadata(_) => "ceph-mds.target",
                    Daemon::Gateway(_) => "ceph-radosgw.target",
                };
                HostCommand::sudo("systemctl").arg("stop").arg(target)
            }
        }
    }

    /// Signal the supervisor to start a daemon. Does not wait for it to come up.
    pub async fn start(&self, daemon: &Daemon) -> Result<()> {
        info!("Starting {:?}", daemon);
        self.host.run(&self.start_command(daemon)).await?;
        Ok(())
    }

    /// Stop daemons; targets may already be gone
    pub async fn stop(&self, daemons: &[Daemon]) {
        let mut sent = Vec::new();
        for daemon in daemons {
            let cmd = self.stop_command(daemon);
            // sysvinit stops every ceph daemon with one call
            if sent.contains(&cmd) {
                continue;
            }
            info!("Stopping {:?}", daemon);
            self.host.run_best_effort(&cmd).await;
            sent.push(cmd);
        }
    }

    /// Forcibly terminate stale daemon processes
    pub async fn terminate(&self, daemons: &[Daemon]) {
        for name in unique_process_names(daemons) {
            self.host
                .run_best_effort(&HostCommand::sudo("pkill").args(["-f", name]))
                .await;
        }
    }

    /// Kill daemons and wait for them to exit
    pub async fn kill(&self, daemons: &[Daemon]) {
        for name in unique_process_names(daemons) {
            self.host
                .run_best_effort(&HostCommand::sudo("killall").args(["-w", "-9", name]))
                .await;
        }
    }

    /// Write the `done` marker and the init-system marker into a daemon directory
    pub async fn write_markers(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        for marker in ["done", self.init.marker_name()] {
            let path = dir.join(marker);
            if !path.exists() {
                tokio::fs::write(&path, b"").await?;
                debug!("Wrote marker {}", path.display());
            }
        }
        Ok(())
    }
}

fn unique_process_names(daemons: &[Daemon]) -> Vec<&'static str> {
    let mut names = Vec::new();
    for daemon in daemons {
        let name = daemon.process_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
