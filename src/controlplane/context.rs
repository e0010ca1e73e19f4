//! Run Context
//!
//! The small amount of state one phase hands to the next: cluster id, the
//! placement rule once created, allocated OSD ids, observed versions. Each
//! phase takes the context by value and returns the updated one; the binary
//! persists it between invocations.

use crate::domain::model::{CephVersion, CrushRule, LifecyclePhase};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Cluster identifier, generated once per run
    pub fsid: Uuid,
    /// Last phase that completed
    pub phase: LifecyclePhase,
    pub crush_rule: Option<CrushRule>,
    pub client_version: Option<CephVersion>,
    pub daemon_version: Option<CephVersion>,
    pub osd_ids: Vec<u32>,
    /// libvirt secret holding the block-store key
    pub hypervisor_secret: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunContext {
    /// Fresh context for a new run
    pub fn new(hypervisor_secret: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            fsid: Uuid::new_v4(),
            phase: LifecyclePhase::Uninstalled,
            crush_rule: None,
            client_version: None,
            daemon_version: None,
            osd_ids: Vec::new(),
            hypervisor_secret: Some(hypervisor_secret.unwrap_or_else(Uuid::new_v4)),
            created_at: now,
            updated_at: now,
        }
    }

    /// Context for tearing down a run whose state file is gone. Only secrets
    /// the operator named explicitly are known.
    pub fn orphaned(hypervisor_secret: Option<Uuid>) -> Self {
        Self {
            hypervisor_secret,
            ..Self::new(None)
        }
    }

    pub fn advance(mut self, phase: LifecyclePhase) -> Self {
        self.phase = phase;
        self.updated_at = Utc::now();
        self
    }

    pub fn with_crush_rule(mut self, rule: CrushRule) -> Self {
        self.crush_rule = Some(rule);
        self
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// JSON file holding the run context between invocations
#[derive(Debug, Clone)]
pub struct RunStateStore {
    path: PathBuf,
}

impl RunStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<RunContext>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let ctx = serde_json::from_str(&text).map_err(|e| Error::StateFile {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        debug!("Loaded run state from {}", self.path.display());
        Ok(Some(ctx))
    }

    pub async fn save(&self, ctx: &RunContext) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(ctx)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved run state ({}) to {}", ctx.phase, self.path.display());
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed run state {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
