//! Readiness Gate
//!
//! After the first monitor starts, nothing may talk to the cluster until it
//! reaches quorum and writes the admin keyring. This is the only place the
//! orchestrator suspends.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Delay between polls
pub const READINESS_INTERVAL: Duration = Duration::from_secs(5);

/// Polls before giving up
pub const READINESS_ATTEMPTS: u32 = 3;

/// Bounded wait for a file to appear
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    path: PathBuf,
    interval: Duration,
    max_attempts: u32,
    cancel: CancellationToken,
}

impl ReadinessGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: READINESS_INTERVAL,
            max_attempts: READINESS_ATTEMPTS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wait until the file exists. Returns the number of polls it took.
    pub async fn wait(&self) -> Result<u32> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.path.exists() {
                info!("{} present after {} poll(s)", self.path.display(), attempt);
                return Ok(attempt);
            }

            if attempt >= self.max_attempts {
                return Err(Error::ReadinessTimeout {
                    path: self.path.clone(),
                    attempts: attempt,
                });
            }

            info!(
                "Waiting for the cluster to write {} ({}/{})",
                self.path.display(),
                attempt,
                self.max_attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => {
                    return Err(Error::WaitCancelled { path: self.path.clone() });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ceph.client.admin.keyring");
        std::fs::write(&path, b"[client.admin]\n").unwrap();

        assert_eq!(ReadinessGate::new(&path).wait().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_two_missed_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ceph.client.admin.keyring");

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            std::fs::write(&writer_path, b"[client.admin]\n").unwrap();
        });

        let polls = ReadinessGate::new(&path).wait().await.unwrap();
        assert_eq!(polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never");

        let started = Instant::now();
        let result = ReadinessGate::new(&path).wait().await;

        assert_matches!(result, Err(Error::ReadinessTimeout { attempts: 3, .. }));
        // Two sleeps between three polls
        assert_eq!(started.elapsed(), READINESS_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let gate = ReadinessGate::new(dir.path().join("never"))
            .with_attempts(100)
            .with_cancellation(cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            cancel.cancel();
        });

        assert_matches!(gate.wait().await, Err(Error::WaitCancelled { .. }));
    }
}
