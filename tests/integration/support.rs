//! Shared fixtures: a seeded git repo, a state store on a temp path, and
//! scripted Planner/Worker/Reviewer collaborators for driving the scheduler
//! without a real agent binary.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::Repository;
use tempfile::TempDir;

use conductor::agents::{
    Planner, ReviewOutcome, ReviewRequest, Reviewer, SessionUsage, Worker, WorkerOutcome,
    WorkerRequest,
};
use conductor::config::ConductorConfig;
use conductor::control::RunControl;
use conductor::core::{HandoffDocument, Task, TaskDAG};
use conductor::git::GitOps;
use conductor::prd::PrdDocument;
use conductor::scheduler::Conductor;
use conductor::state::{ConductorState, StateStore};
use conductor::{Error, Result};

/// A git repo with one seed commit plus temp dirs for state and sentinels.
pub struct Harness {
    pub repo: TempDir,
    pub aux: TempDir,
    pub config: ConductorConfig,
}

impl Harness {
    pub fn new() -> Self {
        let repo = TempDir::new().unwrap();
        let aux = TempDir::new().unwrap();

        let git_repo = Repository::init(repo.path()).unwrap();
        let mut git_config = git_repo.config().unwrap();
        git_config.set_str("user.name", "Test").unwrap();
        git_config.set_str("user.email", "test@localhost").unwrap();
        drop(git_repo);
        std::fs::write(repo.path().join("README.md"), "seed\n").unwrap();
        GitOps::new(repo.path()).unwrap().commit_all("seed").unwrap();

        let config = ConductorConfig {
            working_dir: repo.path().display().to_string(),
            enable_reviewer: false,
            ..Default::default()
        };
        Self { repo, aux, config }
    }

    pub fn state_path(&self) -> PathBuf {
        self.aux.path().join("state/run.json")
    }

    pub fn session_dir(&self) -> PathBuf {
        self.aux.path().join("session")
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.state_path())
    }

    pub fn git(&self) -> GitOps {
        GitOps::new(self.repo.path()).unwrap()
    }

    pub fn state(&self) -> ConductorState {
        ConductorState::new("run-test", self.config.clone())
    }

    pub fn conductor<P, W, R>(&self, planner: P, worker: W, reviewer: R) -> Conductor
    where
        P: Planner + 'static,
        W: Worker + 'static,
        R: Reviewer + 'static,
    {
        Conductor::new(
            self.config.clone(),
            self.store(),
            self.git(),
            RunControl::new(self.session_dir()).unwrap(),
            Box::new(planner),
            Box::new(worker),
            Box::new(reviewer),
        )
    }

    /// Message of the current HEAD commit.
    pub fn head_message(&self) -> String {
        let repo = Repository::open(self.repo.path()).unwrap();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        commit.message().unwrap_or_default().to_string()
    }
}

/// A PRD with no frontmatter (planner path).
pub fn prd(text: &str) -> PrdDocument {
    PrdDocument {
        text: text.to_string(),
        frontmatter: None,
    }
}

/// A PRD parsed from raw markdown, frontmatter included.
pub fn prd_from(raw: &str) -> PrdDocument {
    conductor::prd::parse_prd(raw).unwrap()
}

pub fn task_with_deps(id: &str, deps: &[&str], max_attempts: u32) -> Task {
    let mut task = Task::new(id, &format!("{} title", id), max_attempts);
    task.depends_on = deps.iter().map(|d| d.to_string()).collect();
    task
}

pub fn dag_with(project: &str, tasks: Vec<Task>) -> TaskDAG {
    let mut dag = TaskDAG::new(project);
    for task in tasks {
        dag.add_task(task);
    }
    dag.validate().unwrap();
    dag
}

// --- Scripted worker ---

/// One scripted worker session outcome.
pub enum WorkerStep {
    /// Signal completion without touching the tree.
    Complete,
    /// Write the named file into the repo, then signal completion.
    CompleteWrite(&'static str),
    /// Cross the budget and hand off with the given summary.
    Handoff(&'static str),
    /// End without completing.
    Incomplete(&'static str),
    /// Hit the session wall-clock ceiling.
    Timeout,
}

/// What the scheduler passed into one worker session.
#[derive(Debug, Clone)]
pub struct WorkerCall {
    pub task_id: String,
    pub session: u32,
    pub handoff_summary: Option<String>,
    pub failure_context: Option<String>,
}

struct WorkerInner {
    repo_dir: PathBuf,
    script: Mutex<VecDeque<WorkerStep>>,
    calls: Mutex<Vec<WorkerCall>>,
}

#[derive(Clone)]
pub struct ScriptedWorker {
    inner: Arc<WorkerInner>,
}

impl ScriptedWorker {
    pub fn new(repo_dir: &Path, steps: Vec<WorkerStep>) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                repo_dir: repo_dir.to_path_buf(),
                script: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn task_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.task_id).collect()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn run_session(&self, request: WorkerRequest<'_>) -> Result<WorkerOutcome> {
        self.inner.calls.lock().unwrap().push(WorkerCall {
            task_id: request.task.id.clone(),
            session: request.session,
            handoff_summary: request.handoff.map(|h| h.summary.clone()),
            failure_context: request.failure_context.map(String::from),
        });

        let step = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(WorkerStep::Complete);
        let usage = SessionUsage {
            input_tokens: 1000,
            output_tokens: 200,
            cost_usd: 0.01,
        };
        match step {
            WorkerStep::Complete => Ok(WorkerOutcome::Completed { usage }),
            WorkerStep::CompleteWrite(name) => {
                std::fs::write(self.inner.repo_dir.join(name), "generated\n")?;
                Ok(WorkerOutcome::Completed { usage })
            }
            WorkerStep::Handoff(summary) => Ok(WorkerOutcome::Handoff {
                doc: HandoffDocument::new(summary, request.session),
                usage,
            }),
            WorkerStep::Incomplete(reason) => Ok(WorkerOutcome::Incomplete {
                reason: reason.to_string(),
                usage,
            }),
            WorkerStep::Timeout => Err(Error::Timeout(std::time::Duration::from_secs(1))),
        }
    }
}

// --- Scripted reviewer ---

pub struct ReviewStep {
    pub approved: bool,
    pub fixes_applied: bool,
    /// File the reviewer writes into the repo before answering.
    pub write_file: Option<&'static str>,
}

struct ReviewerInner {
    repo_dir: PathBuf,
    script: Mutex<VecDeque<ReviewStep>>,
    diffs: Mutex<Vec<String>>,
}

#[derive(Clone)]
pub struct ScriptedReviewer {
    inner: Arc<ReviewerInner>,
}

impl ScriptedReviewer {
    pub fn new(repo_dir: &Path, steps: Vec<ReviewStep>) -> Self {
        Self {
            inner: Arc::new(ReviewerInner {
                repo_dir: repo_dir.to_path_buf(),
                script: Mutex::new(steps.into()),
                diffs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Reviewer that approves everything and touches nothing.
    pub fn approve_all(repo_dir: &Path) -> Self {
        Self::new(repo_dir, Vec::new())
    }

    pub fn diffs(&self) -> Vec<String> {
        self.inner.diffs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewOutcome> {
        self.inner
            .diffs
            .lock()
            .unwrap()
            .push(request.diff.to_string());

        let step = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ReviewStep {
                approved: true,
                fixes_applied: false,
                write_file: None,
            });
        if let Some(name) = step.write_file {
            std::fs::write(self.inner.repo_dir.join(name), "reviewer fix\n")?;
        }
        Ok(ReviewOutcome {
            approved: step.approved,
            fixes_applied: step.fixes_applied,
            summary: "reviewed".to_string(),
            usage: SessionUsage {
                input_tokens: 500,
                output_tokens: 100,
                cost_usd: 0.005,
            },
        })
    }
}

// --- Stub planner ---

struct PlannerInner {
    dag: Option<TaskDAG>,
    prds: Mutex<Vec<String>>,
}

#[derive(Clone)]
pub struct StubPlanner {
    inner: Arc<PlannerInner>,
}

impl StubPlanner {
    pub fn returning(dag: TaskDAG) -> Self {
        Self {
            inner: Arc::new(PlannerInner {
                dag: Some(dag),
                prds: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Planner for runs that must never reach the planning phase.
    pub fn unreachable() -> Self {
        Self {
            inner: Arc::new(PlannerInner {
                dag: None,
                prds: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn prds_seen(&self) -> Vec<String> {
        self.inner.prds.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for StubPlanner {
    async fn plan(&self, prd_text: &str, _project_tree: &str) -> Result<TaskDAG> {
        self.inner.prds.lock().unwrap().push(prd_text.to_string());
        self.inner
            .dag
            .clone()
            .ok_or_else(|| Error::Validation("planner invoked unexpectedly".to_string()))
    }
}
