//! Run configuration and on-disk layout.
//!
//! A `ConductorConfig` is built once from CLI arguments, snapshotted into the
//! persisted state, and passed explicitly through every scheduler operation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Default context window assumed for worker sessions.
pub const DEFAULT_CONTEXT_WINDOW: u64 = 400_000;

/// Default fraction of the context window a worker session may consume
/// before it must hand off.
pub const DEFAULT_BUDGET_THRESHOLD: f64 = 0.7;

/// Default wall-clock ceiling for a single check command (seconds).
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 600;

/// Default wall-clock ceiling for a worker/reviewer session (seconds).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;

/// Configuration snapshot for a conductor run.
///
/// Serialized into the state file so a resumed run replays with the exact
/// same thresholds it started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    pub prd_path: String,
    pub working_dir: String,
    pub model: String,
    /// Command used to invoke the backing coding agent.
    pub agent_cmd: String,
    pub state_path: Option<String>,
    pub context_window: u64,
    pub budget_threshold: f64,
    pub max_worker_turns: u32,
    pub max_worker_sessions: u32,
    pub max_task_attempts: u32,
    pub check_timeout_secs: u64,
    pub session_timeout_secs: u64,
    pub test_cmd: Option<String>,
    pub lint_cmd: Option<String>,
    pub typecheck_cmd: Option<String>,
    pub enable_reviewer: bool,
    pub git_branch: Option<String>,
    pub team_id: Option<String>,
    pub project_id: Option<String>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            prd_path: String::new(),
            working_dir: ".".to_string(),
            model: std::env::var("CONDUCTOR_MODEL").unwrap_or_else(|_| "sonnet".to_string()),
            agent_cmd: "claude".to_string(),
            state_path: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
            budget_threshold: DEFAULT_BUDGET_THRESHOLD,
            max_worker_turns: 3,
            max_worker_sessions: 3,
            max_task_attempts: 3,
            check_timeout_secs: DEFAULT_CHECK_TIMEOUT_SECS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            test_cmd: None,
            lint_cmd: None,
            typecheck_cmd: None,
            enable_reviewer: true,
            git_branch: None,
            team_id: None,
            project_id: None,
        }
    }
}

impl ConductorConfig {
    /// Base directory for conductor artifacts (`~/.conductor`).
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    /// Directory holding persisted run state files.
    pub fn runs_dir() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("runs"))
    }

    /// Session directory for a run (pause/cancel sentinels live here).
    pub fn session_dir(run_id: &str) -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join(format!("session-{}", run_id)))
    }

    /// Maximum tokens a worker session may consume before handing off.
    pub fn session_budget(&self) -> u64 {
        (self.context_window as f64 * self.budget_threshold) as u64
    }

    /// Wall-clock ceiling for a single check command.
    pub fn check_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_timeout_secs)
    }

    /// Wall-clock ceiling for a worker/reviewer session.
    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_timeout_secs)
    }
}
