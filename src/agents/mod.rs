//! Collaborator contracts: the Planner, Worker, and Reviewer agents the
//! scheduler drives. The scheduler never inspects collaborator internals; it
//! only sees the structured outcomes defined here.

pub mod claude;
pub mod headless;
pub mod prompts;

pub use claude::{ClaudePlanner, ClaudeReviewer, ClaudeWorker};
pub use headless::AgentCli;

use async_trait::async_trait;

use crate::core::{HandoffDocument, Task, TaskDAG};
use crate::Result;

/// Token/cost accounting for one collaborator session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl SessionUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &SessionUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Everything a worker session needs to start (or continue) a task.
pub struct WorkerRequest<'a> {
    pub task: &'a Task,
    pub dag: &'a TaskDAG,
    /// PRD body text for project context on the first session.
    pub prd_text: &'a str,
    /// Handoff from the previous session, when continuing.
    pub handoff: Option<&'a HandoffDocument>,
    /// Check failure output, when this session is a retry.
    pub failure_context: Option<&'a str>,
    /// 1-based session number within the current attempt.
    pub session: u32,
}

/// How a single worker session ended.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// The worker signalled completion.
    Completed { usage: SessionUsage },
    /// Budget crossed before completion; a fresh session continues from the
    /// document.
    Handoff {
        doc: HandoffDocument,
        usage: SessionUsage,
    },
    /// The session ended without completing or handing off.
    Incomplete { reason: String, usage: SessionUsage },
}

impl WorkerOutcome {
    pub fn usage(&self) -> &SessionUsage {
        match self {
            WorkerOutcome::Completed { usage } => usage,
            WorkerOutcome::Handoff { usage, .. } => usage,
            WorkerOutcome::Incomplete { usage, .. } => usage,
        }
    }
}

pub struct ReviewRequest<'a> {
    pub task: &'a Task,
    pub dag: &'a TaskDAG,
    /// Unified diff of the task's changes since its base commit.
    pub diff: &'a str,
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub approved: bool,
    pub fixes_applied: bool,
    pub summary: String,
    pub usage: SessionUsage,
}

/// Turns a PRD into a validated task DAG.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, prd_text: &str, project_tree: &str) -> Result<TaskDAG>;
}

/// Runs one implementation session against the working tree.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run_session(&self, request: WorkerRequest<'_>) -> Result<WorkerOutcome>;
}

/// Reviews a task's diff, fixing issues in place.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewOutcome>;
}
