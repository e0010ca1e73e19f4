//! Error types for the Ceph lifecycle orchestrator
//!
//! Every error aborts the phase that raised it. The [`Recovery`] classification
//! only tells the operator what to do before invoking the phase again.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Phase {phase} cannot run while the cluster is {current}")]
    PhaseOrder { phase: String, current: String },

    #[error("Run state file {path} is unreadable: {reason}")]
    StateFile { path: PathBuf, reason: String },

    // =========================================================================
    // Readiness Errors
    // =========================================================================
    #[error("Cluster did not become ready: {path} missing after {attempts} attempts")]
    ReadinessTimeout { path: PathBuf, attempts: u32 },

    #[error("Readiness wait for {path} was cancelled")]
    WaitCancelled { path: PathBuf },

    // =========================================================================
    // Platform Errors
    // =========================================================================
    #[error("{command} changes the host and must run as root (effective uid {uid})")]
    NotPrivileged { command: String, uid: u32 },

    #[error("Unsupported platform: {distro} (set FORCE_CEPH_INSTALL to override)")]
    UnsupportedPlatform { distro: String },

    #[error("Invalid Ceph version string: {0}")]
    InvalidVersion(String),

    #[error("Command failed: {command} (exit {status}): {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Remote object gateway selected but CEPH_REMOTE_RGW_URL is not set")]
    MissingGatewayUrl,

    #[error("Refusing to remove pools and credentials from a remote cluster without confirmation (set CEPH_CONFIRM_POOL_DELETE)")]
    DeletionNotConfirmed,

    #[error("Cluster rejected {operation}: {reason}")]
    ClusterOperation { operation: String, reason: String },

    // =========================================================================
    // Catalog Errors
    // =========================================================================
    #[error("Catalog connection error: {0}")]
    CatalogConnection(#[from] reqwest::Error),

    #[error("Catalog API error: {status} - {reason}")]
    CatalogApi { status: u16, reason: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the operator should do after a failed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Fix the cause and invoke the same phase again
    RerunPhase,
    /// Correct the settings before rerunning
    FixConfiguration,
    /// Nothing to rerun; run cleanup and start over
    Abort,
}

impl Error {
    /// Determine the operator action for this error
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::Configuration(_)
            | Error::UnsupportedPlatform { .. }
            | Error::MissingGatewayUrl
            | Error::NotPrivileged { .. }
            | Error::DeletionNotConfirmed
            | Error::PhaseOrder { .. } => Recovery::FixConfiguration,

            // A monitor that never reached quorum is not retried in place
            Error::ReadinessTimeout { .. } | Error::StateFile { .. } => Recovery::Abort,

            // Command failures, catalog errors and IO are handled by rerunning
            // the idempotent phase.
            _ => Recovery::RerunPhase,
        }
    }

    /// Build a command failure from a process output
    pub fn command(command: impl Into<String>, status: Option<i32>, stderr: &[u8]) -> Self {
        Error::CommandFailed {
            command: command.into(),
            status: status.unwrap_or(-1),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_actions() {
        let err = Error::ReadinessTimeout {
            path: PathBuf::from("/etc/ceph/ceph.client.admin.keyring"),
            attempts: 3,
        };
        assert_eq!(err.recovery(), Recovery::Abort);

        let err = Error::WaitCancelled {
            path: PathBuf::from("/etc/ceph/ceph.client.admin.keyring"),
        };
        assert_eq!(err.recovery(), Recovery::RerunPhase);

        let err = Error::MissingGatewayUrl;
        assert_eq!(err.recovery(), Recovery::FixConfiguration);

        let err = Error::StateFile {
            path: PathBuf::from("/tmp/state.json"),
            reason: "truncated".into(),
        };
        assert_eq!(err.recovery(), Recovery::Abort);
    }

    #[test]
    fn test_command_error_trims_stderr() {
        let err = Error::command("ceph osd pool create", Some(22), b"Error EINVAL: bad pg\n");
        match err {
            Error::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, 22);
                assert_eq!(stderr, "Error EINVAL: bad pg");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
