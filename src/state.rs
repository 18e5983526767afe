//! Atomic, crash-safe persistence for conductor runs.
//!
//! The state file is the single source of truth for resume: it is written
//! with a tmp-then-rename so the real path is never observed half-written,
//! and loading never trusts a task found InProgress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ConductorConfig;
use crate::core::{TaskDAG, TaskStatus};
use crate::{clog, clog_debug, Error, Result};

/// Terminal (or in-flight) status of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every task Done.
    Completed,
    /// At least one task Failed and nothing further is ready.
    Blocked,
    /// Stopped by an external signal; resumable via `--resume`.
    Paused { reason: String },
    /// Unrecoverable failure (validation, persistence, dirty tree).
    Error,
}

impl RunStatus {
    /// Process exit code for this run outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::Running | RunStatus::Error => 1,
            RunStatus::Blocked => 2,
            RunStatus::Paused { .. } => 3,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Blocked => write!(f, "blocked"),
            RunStatus::Paused { reason } => write!(f, "paused ({})", reason),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

/// Full persisted state of a conductor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorState {
    pub run_id: String,
    pub config: ConductorConfig,
    /// None until planning has produced a DAG.
    #[serde(default)]
    pub dag: Option<TaskDAG>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConductorState {
    pub fn new(run_id: &str, config: ConductorConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            config,
            dag: None,
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persists `ConductorState` as pretty JSON at a fixed path.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default state file path for a run id.
    pub fn path_for_run(run_id: &str) -> Result<PathBuf> {
        Ok(ConductorConfig::runs_dir()?.join(format!("{}.json", run_id)))
    }

    /// Most recently modified run file in the default runs directory.
    ///
    /// Used by bare `--resume` when no `--state` path is given.
    pub fn latest_run_path() -> Result<Option<PathBuf>> {
        let runs_dir = ConductorConfig::runs_dir()?;
        if !runs_dir.exists() {
            return Ok(None);
        }
        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(&runs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if latest.as_ref().map(|(m, _)| modified > *m).unwrap_or(true) {
                latest = Some((modified, path));
            }
        }
        Ok(latest.map(|(_, p)| p))
    }

    /// Atomically write the state: serialize to a `.tmp` sibling, then rename
    /// over the target. A failed write is fatal to the run.
    pub fn save(&self, state: &mut ConductorState) -> Result<()> {
        state.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Persistence(format!("serialize state: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| Error::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Persistence(format!("rename {}: {}", self.path.display(), e)))?;

        clog_debug!("State saved to {}", self.path.display());
        Ok(())
    }

    /// Load state from disk, resetting any stale InProgress task to Pending.
    ///
    /// Partial edits from an interrupted worker session are never trusted,
    /// so the task is reselected and retried from scratch.
    pub fn load(&self) -> Result<ConductorState> {
        if !self.path.exists() {
            return Err(Error::StateNotFound(self.path.display().to_string()));
        }
        let json = std::fs::read_to_string(&self.path)?;
        let mut state: ConductorState = serde_json::from_str(&json)?;
        if let Some(dag) = state.dag.as_mut() {
            for task in dag.tasks.values_mut() {
                if task.status == TaskStatus::InProgress {
                    clog!("Resetting stale in-progress task {} to pending", task.id);
                    task.reset_to_pending();
                }
            }
        }
        Ok(state)
    }
}
