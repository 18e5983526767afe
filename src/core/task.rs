//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work driven through the
//! implement -> commit -> verify -> review pipeline. Each task tracks its
//! status, retry accounting, commit history, handoff documents, and usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::checks::VerificationConfig;

/// Task status in its lifecycle.
///
/// A task is created `Pending`, is `InProgress` only while the scheduler
/// actively drives it, becomes `Done` only after checks (and review, if
/// enabled) pass, and becomes `Failed` only when its attempt or session
/// budget is exhausted. `Failed` is terminal and permanently blocks
/// dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Token/cost accounting for a single task, split by collaborator role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub worker_input_tokens: u64,
    pub worker_output_tokens: u64,
    pub worker_cost_usd: f64,
    pub worker_sessions: u32,
    pub reviewer_input_tokens: u64,
    pub reviewer_output_tokens: u64,
    pub reviewer_cost_usd: f64,
}

impl TaskUsage {
    /// Total cost across worker and reviewer sessions.
    pub fn total_cost_usd(&self) -> f64 {
        self.worker_cost_usd + self.reviewer_cost_usd
    }
}

/// Structured summary produced when a worker session runs out of context
/// budget before finishing.
///
/// Carries enough for a fresh session to continue the task without
/// replaying the prior transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffDocument {
    /// Progress made so far, in the worker's own words.
    pub summary: String,
    /// Concrete remaining steps.
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// Files the next session should look at first.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Which worker session (1-based) produced this document.
    pub session: u32,
    pub created_at: DateTime<Utc>,
}

impl HandoffDocument {
    pub fn new(summary: impl Into<String>, session: u32) -> Self {
        Self {
            summary: summary.into(),
            next_steps: Vec::new(),
            files: Vec::new(),
            session,
            created_at: Utc::now(),
        }
    }

    /// Render the document as markdown for seeding a fresh session.
    pub fn to_markdown(&self) -> String {
        let mut out = self.summary.clone();
        if !self.next_steps.is_empty() {
            out.push_str("\n\n## Remaining work\n");
            for step in &self.next_steps {
                out.push_str(&format!("- {}\n", step));
            }
        }
        if !self.files.is_empty() {
            out.push_str("\n## Files to revisit\n");
            for file in &self.files {
                out.push_str(&format!("- {}\n", file.display()));
            }
        }
        out
    }
}

/// A single unit of work in the task DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, referenced by dependents (e.g. "T1").
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Ids of tasks that must be Done before this one may start.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Attempts consumed so far (an attempt starts when the scheduler
    /// marks the task InProgress).
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    /// Every commit made on behalf of this task, in order.
    #[serde(default)]
    pub commit_shas: Vec<String>,
    /// One document per worker-session handoff, in order.
    #[serde(default)]
    pub handoff_documents: Vec<HandoffDocument>,
    #[serde(default)]
    pub usage: TaskUsage,
    /// Per-task verification commands, overriding the DAG-level config.
    #[serde(default)]
    pub verification_override: Option<VerificationConfig>,
    /// Last failure reason, for the summary and retry prompts.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new Pending task with the given id and title.
    pub fn new(id: &str, title: &str, max_attempts: u32) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            depends_on: BTreeSet::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            commit_shas: Vec::new(),
            handoff_documents: Vec::new(),
            usage: TaskUsage::default(),
            verification_override: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Begin an attempt: transition to InProgress and consume one attempt.
    pub fn start_attempt(&mut self) {
        self.status = TaskStatus::InProgress;
        self.attempts += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the task successfully completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Done;
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task terminally failed with a reason.
    pub fn fail(&mut self, reason: &str) {
        self.status = TaskStatus::Failed;
        self.error = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
    }

    /// Return the task to Pending so the reentrant loop reselects it.
    ///
    /// Used when a retryable failure consumed an attempt but attempts
    /// remain, and on resume for tasks found InProgress.
    pub fn reset_to_pending(&mut self) {
        self.status = TaskStatus::Pending;
    }

    /// Record a commit made on behalf of this task.
    pub fn record_commit(&mut self, sha: &str) {
        self.commit_shas.push(sha.to_string());
    }

    /// Record a handoff document from a budget-bounded worker session.
    pub fn record_handoff(&mut self, doc: HandoffDocument) {
        self.handoff_documents.push(doc);
    }

    /// Latest handoff document, if any.
    pub fn last_handoff(&self) -> Option<&HandoffDocument> {
        self.handoff_documents.last()
    }

    /// Latest commit made for this task, if any.
    pub fn last_commit(&self) -> Option<&str> {
        self.commit_shas.last().map(String::as_str)
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Check if another attempt may be started.
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
