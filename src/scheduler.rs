//! The conductor loop: drives the task DAG to a terminal run state.
//!
//! The scheduler is the sole writer of persisted state. It is strictly
//! sequential (at most one task InProgress) and reentrant: given identical
//! persisted state it always selects the same next action, which is what
//! makes resume correct without replaying history.

use std::path::Path;

use crate::agents::{Planner, ReviewRequest, Reviewer, Worker, WorkerOutcome, WorkerRequest};
use crate::checks::{detect_verification, run_checks, CheckReport, VerificationConfig};
use crate::config::ConductorConfig;
use crate::control::RunControl;
use crate::core::{HandoffDocument, TaskStatus};
use crate::git::GitOps;
use crate::prd::{dag_from_frontmatter, project_tree, PrdDocument};
use crate::state::{ConductorState, RunStatus, StateStore};
use crate::{clog, clog_error, clog_warn, Error, Result};

const PROJECT_TREE_DEPTH: usize = 3;
const ERROR_CONTEXT_LIMIT: usize = 2000;

/// How `execute_task` resolved; `Stop` ends the run loop with the status.
enum TaskFlow {
    Continue,
    Stop(RunStatus),
}

/// One row of the final run summary.
#[derive(Debug, Clone)]
pub struct TaskSummaryRow {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub commits: usize,
    pub cost_usd: f64,
}

/// Final summary, always produced even on partial failure.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub project_name: String,
    pub status: RunStatus,
    pub rows: Vec<TaskSummaryRow>,
    pub total_cost_usd: f64,
}

impl RunSummary {
    pub fn from_state(state: &ConductorState) -> Self {
        let mut rows = Vec::new();
        let mut total_cost = 0.0;
        let mut project_name = String::new();
        if let Some(dag) = &state.dag {
            project_name = dag.project_name.clone();
            for task in dag.tasks.values() {
                let cost = task.usage.total_cost_usd();
                total_cost += cost;
                rows.push(TaskSummaryRow {
                    id: task.id.clone(),
                    title: task.title.clone(),
                    status: task.status,
                    attempts: task.attempts,
                    commits: task.commit_shas.len(),
                    cost_usd: cost,
                });
            }
        }
        Self {
            project_name,
            status: state.status.clone(),
            rows,
            total_cost_usd: total_cost,
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Conductor summary - {}", self.project_name)?;
        for row in &self.rows {
            writeln!(
                f,
                "  {}: {} [{}] attempts={} commits={} cost=${:.4}",
                row.id, row.title, row.status, row.attempts, row.commits, row.cost_usd
            )?;
        }
        writeln!(f, "Total cost: ${:.4}", self.total_cost_usd)?;
        write!(f, "Final status: {}", self.status)
    }
}

/// The orchestrator composing planning, workers, git, checks, and review.
pub struct Conductor {
    config: ConductorConfig,
    store: StateStore,
    git: GitOps,
    control: RunControl,
    planner: Box<dyn Planner>,
    worker: Box<dyn Worker>,
    reviewer: Box<dyn Reviewer>,
}

impl Conductor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConductorConfig,
        store: StateStore,
        git: GitOps,
        control: RunControl,
        planner: Box<dyn Planner>,
        worker: Box<dyn Worker>,
        reviewer: Box<dyn Reviewer>,
    ) -> Self {
        Self {
            config,
            store,
            git,
            control,
            planner,
            worker,
            reviewer,
        }
    }

    /// Drive the run to a terminal status. Fatal errors (validation,
    /// persistence, dirty tree) propagate as `Err`; everything else ends in
    /// a terminal `RunStatus`.
    pub async fn run(&self, state: &mut ConductorState, prd: &PrdDocument) -> Result<RunStatus> {
        if state.dag.is_none() {
            self.plan(state, prd).await?;
        }

        if let Some(branch) = &self.config.git_branch {
            self.git.checkout_or_create_branch(branch)?;
            clog!("On branch {}", branch);
        }

        loop {
            if self.control.cancel_requested() {
                return self.stop_paused(state, "cancelled by operator");
            }
            if !self.control.wait_while_paused().await {
                return self.stop_paused(state, "cancelled by operator");
            }

            // Per-task commit isolation requires a clean tree between tasks.
            if !self.git.is_clean()? {
                state.status = RunStatus::Error;
                self.store.save(state)?;
                return Err(Error::DirtyWorkTree(self.config.working_dir.clone()));
            }

            let dag = state.dag.as_ref().ok_or_else(|| {
                Error::Validation("run has no task DAG after planning".to_string())
            })?;
            let Some(task_id) = dag.next_ready_task() else {
                let status = if dag.all_done() {
                    println!("All tasks completed.");
                    RunStatus::Completed
                } else {
                    let failed = dag.ids_with_status(TaskStatus::Failed).len();
                    let blocked = dag.blocked_tasks().len();
                    println!("No ready tasks: {} failed, {} blocked.", failed, blocked);
                    RunStatus::Blocked
                };
                state.status = status.clone();
                self.store.save(state)?;
                self.control.clear_sentinels();
                return Ok(status);
            };

            match self.execute_task(state, &task_id, &prd.text).await? {
                TaskFlow::Continue => {}
                TaskFlow::Stop(status) => {
                    state.status = status.clone();
                    self.store.save(state)?;
                    self.control.clear_sentinels();
                    return Ok(status);
                }
            }
        }
    }

    /// Produce the DAG: literal frontmatter wins; otherwise the Planner runs
    /// with the PRD text and a bounded project tree listing. Verification
    /// left empty falls back to manifest auto-detection.
    async fn plan(&self, state: &mut ConductorState, prd: &PrdDocument) -> Result<()> {
        let mut dag = match &prd.frontmatter {
            Some(frontmatter) => dag_from_frontmatter(frontmatter, &self.config)?,
            None => {
                println!("Planning tasks from PRD...");
                let tree = project_tree(self.git.repo_path(), PROJECT_TREE_DEPTH);
                self.planner.plan(&prd.text, &tree).await?
            }
        };

        if dag.verification.is_empty() {
            dag.verification = detect_verification(self.git.repo_path());
        }

        println!(
            "Planned {} tasks for project '{}'",
            dag.len(),
            dag.project_name
        );
        for task in dag.tasks.values() {
            let deps = if task.depends_on.is_empty() {
                String::new()
            } else {
                format!(
                    " (depends: {})",
                    task.depends_on
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            println!("  {}: {}{}", task.id, task.title, deps);
        }

        state.dag = Some(dag);
        self.store.save(state)?;
        Ok(())
    }

    fn stop_paused(&self, state: &mut ConductorState, reason: &str) -> Result<RunStatus> {
        clog!("Run paused: {}", reason);
        println!("Conductor paused: {}. Resume with --resume.", reason);
        let status = RunStatus::Paused {
            reason: reason.to_string(),
        };
        state.status = status.clone();
        self.store.save(state)?;
        // Consume the sentinel so a later --resume does not immediately
        // stop again.
        self.control.clear_sentinels();
        Ok(status)
    }

    /// A wall-clock timeout consumed the attempt; with attempts remaining the
    /// task returns to Pending for reselection, otherwise it is Failed.
    fn handle_phase_timeout(
        &self,
        state: &mut ConductorState,
        task_id: &str,
        phase: &str,
    ) -> Result<TaskFlow> {
        let task = state
            .dag
            .as_mut()
            .and_then(|d| d.get_mut(task_id))
            .ok_or_else(|| Error::Validation(format!("unknown task {}", task_id)))?;
        if task.attempts_remaining() {
            clog_warn!(
                "task {} {} timed out (attempt {}), returning to pending",
                task_id,
                phase,
                task.attempts
            );
            task.reset_to_pending();
        } else {
            clog_error!("task {} {} timed out with no attempts left", task_id, phase);
            task.fail(&format!(
                "{} timed out after {} attempts",
                phase, task.attempts
            ));
        }
        self.store.save(state)?;
        Ok(TaskFlow::Continue)
    }

    /// Commit with a single retry; a second failure escalates to a
    /// task-scoped error.
    fn commit_with_retry(&self, message: &str) -> Result<Option<String>> {
        match self.git.commit_all(message) {
            Ok(sha) => Ok(sha),
            Err(first) => {
                clog_warn!("commit failed, retrying once: {}", first);
                self.git.commit_all(message).map_err(|second| {
                    Error::ResourceExhausted(format!("git commit failed twice: {}", second))
                })
            }
        }
    }

    /// Drive one task through worker sessions, commit, checks (with bounded
    /// retries), and the reviewer gate.
    async fn execute_task(
        &self,
        state: &mut ConductorState,
        task_id: &str,
        prd_text: &str,
    ) -> Result<TaskFlow> {
        let base_sha = self.git.head_commit()?;

        {
            let task = state
                .dag
                .as_mut()
                .and_then(|d| d.get_mut(task_id))
                .ok_or_else(|| Error::Validation(format!("unknown task {}", task_id)))?;
            task.start_attempt();
            println!(
                "\nTask {}: {} (attempt {})",
                task.id, task.title, task.attempts
            );
        }
        self.store.save(state)?;

        // --- Worker phase: sessions with budget-aware handoff ---
        let mut handoff: Option<HandoffDocument> = state
            .dag
            .as_ref()
            .and_then(|d| d.get(task_id))
            .and_then(|t| t.last_handoff().cloned());
        let mut completed = false;
        let mut incomplete_reason = String::new();

        for session in 1..=self.config.max_worker_sessions {
            if self.control.cancel_requested() {
                return Ok(TaskFlow::Stop(RunStatus::Paused {
                    reason: "cancelled by operator".to_string(),
                }));
            }

            println!(
                "  Worker session {}{}",
                session,
                if handoff.is_some() {
                    " (resuming from handoff)"
                } else {
                    ""
                }
            );

            let outcome = {
                let dag = state.dag.as_ref().expect("dag present during execution");
                let task = dag.get(task_id).expect("task present during execution");
                let request = WorkerRequest {
                    task,
                    dag,
                    prd_text,
                    handoff: handoff.as_ref(),
                    failure_context: None,
                    session,
                };
                match self.worker.run_session(request).await {
                    Ok(outcome) => outcome,
                    Err(Error::Timeout(_)) => {
                        return self.handle_phase_timeout(state, task_id, "worker session");
                    }
                    Err(e) => return Err(e),
                }
            };

            {
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                let usage = outcome.usage();
                task.usage.worker_input_tokens += usage.input_tokens;
                task.usage.worker_output_tokens += usage.output_tokens;
                task.usage.worker_cost_usd += usage.cost_usd;
                task.usage.worker_sessions += 1;
            }

            match outcome {
                WorkerOutcome::Completed { .. } => {
                    self.store.save(state)?;
                    completed = true;
                    break;
                }
                WorkerOutcome::Handoff { doc, .. } => {
                    println!("  Worker handed off to a fresh session");
                    let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                    task.record_handoff(doc.clone());
                    handoff = Some(doc);
                    self.store.save(state)?;
                }
                WorkerOutcome::Incomplete { reason, .. } => {
                    self.store.save(state)?;
                    incomplete_reason = reason;
                    break;
                }
            }
        }

        if !completed {
            let reason = if incomplete_reason.is_empty() {
                format!(
                    "worker did not complete within {} sessions/handoffs",
                    self.config.max_worker_sessions
                )
            } else {
                incomplete_reason
            };
            clog_error!("task {} failed: {}", task_id, reason);
            println!("  Task {} FAILED: {}", task_id, reason);
            let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
            task.fail(&reason);
            self.store.save(state)?;
            return Ok(TaskFlow::Continue);
        }

        // --- Commit the worker's changes ---
        let message = {
            let task = state.dag.as_ref().unwrap().get(task_id).unwrap();
            format!("conductor: {} - {}", task.id, task.title)
        };
        match self.commit_with_retry(&message) {
            Ok(Some(sha)) => {
                println!("  Committed: {:.8}", sha);
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.record_commit(&sha);
            }
            Ok(None) => println!("  No changes to commit"),
            Err(e) => {
                let reason = e.to_string();
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.fail(&reason);
                self.store.save(state)?;
                return Ok(TaskFlow::Continue);
            }
        }
        self.store.save(state)?;

        let verification = state
            .dag
            .as_ref()
            .unwrap()
            .effective_verification(task_id);
        let working_dir = self.git.repo_path().to_path_buf();

        // --- Gate 1: automated checks, with bounded retries ---
        let mut report = run_checks(&verification, &working_dir, self.config.check_timeout()).await;
        if !report.passed() {
            println!("  Checks failed");
            match self
                .retry_checks_loop(state, task_id, &mut report)
                .await?
            {
                TaskFlow::Stop(status) => return Ok(TaskFlow::Stop(status)),
                TaskFlow::Continue => {}
            }
            let task = state.dag.as_ref().unwrap().get(task_id).unwrap();
            if task.status == TaskStatus::Failed {
                return Ok(TaskFlow::Continue);
            }
            if !report.passed() {
                let context: String =
                    report.failure_context().chars().take(ERROR_CONTEXT_LIMIT).collect();
                let attempts = task.attempts;
                println!("  Task {} FAILED after {} attempts", task_id, attempts);
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.fail(&context);
                self.store.save(state)?;
                return Ok(TaskFlow::Continue);
            }
            println!("  Checks passed after retry");
        } else {
            println!("  Checks passed");
        }

        // --- Gate 2: reviewer ---
        if self.config.enable_reviewer {
            match self
                .review_task(state, task_id, &base_sha, &verification, &working_dir)
                .await?
            {
                TaskFlow::Stop(status) => return Ok(TaskFlow::Stop(status)),
                TaskFlow::Continue => {}
            }
            let task = state.dag.as_ref().unwrap().get(task_id).unwrap();
            if task.status == TaskStatus::Failed {
                return Ok(TaskFlow::Continue);
            }
        }

        let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
        task.complete();
        let attempts = task.attempts;
        self.store.save(state)?;
        println!("  Task {} DONE", task_id);
        if attempts > 1 {
            println!("  Note: task {} required {} attempts.", task_id, attempts);
        }
        Ok(TaskFlow::Continue)
    }

    /// Retry failed checks with fresh worker sessions, bounded by
    /// `max_task_attempts`. Mutates `report` with the latest result.
    async fn retry_checks_loop(
        &self,
        state: &mut ConductorState,
        task_id: &str,
        report: &mut CheckReport,
    ) -> Result<TaskFlow> {
        let verification = state
            .dag
            .as_ref()
            .unwrap()
            .effective_verification(task_id);
        let working_dir = self.git.repo_path().to_path_buf();

        loop {
            {
                let task = state.dag.as_ref().unwrap().get(task_id).unwrap();
                if task.status == TaskStatus::Failed || !task.attempts_remaining() {
                    return Ok(TaskFlow::Continue);
                }
            }
            if self.control.cancel_requested() {
                return Ok(TaskFlow::Stop(RunStatus::Paused {
                    reason: "cancelled by operator".to_string(),
                }));
            }

            let attempt = {
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.start_attempt();
                task.attempts
            };
            self.store.save(state)?;
            println!("  Retrying (attempt {})...", attempt);

            let failure = report.failure_context();
            let outcome = {
                let dag = state.dag.as_ref().unwrap();
                let task = dag.get(task_id).unwrap();
                let request = WorkerRequest {
                    task,
                    dag,
                    prd_text: "",
                    handoff: None,
                    failure_context: Some(&failure),
                    session: 1,
                };
                match self.worker.run_session(request).await {
                    Ok(outcome) => outcome,
                    Err(Error::Timeout(_)) => {
                        return self.handle_phase_timeout(state, task_id, "retry session");
                    }
                    Err(e) => return Err(e),
                }
            };

            {
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                let usage = outcome.usage();
                task.usage.worker_input_tokens += usage.input_tokens;
                task.usage.worker_output_tokens += usage.output_tokens;
                task.usage.worker_cost_usd += usage.cost_usd;
                task.usage.worker_sessions += 1;
            }
            self.store.save(state)?;

            if !matches!(outcome, WorkerOutcome::Completed { .. }) {
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.fail("retry worker did not signal completion");
                self.store.save(state)?;
                println!("  Task {} FAILED: retry worker did not complete", task_id);
                return Ok(TaskFlow::Continue);
            }

            let message = format!("conductor: {} - fix checks (attempt {})", task_id, attempt);
            match self.commit_with_retry(&message) {
                Ok(Some(sha)) => {
                    let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                    task.record_commit(&sha);
                    self.store.save(state)?;
                }
                Ok(None) => {}
                Err(e) => {
                    let reason = e.to_string();
                    let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                    task.fail(&reason);
                    self.store.save(state)?;
                    return Ok(TaskFlow::Continue);
                }
            }

            *report = run_checks(&verification, &working_dir, self.config.check_timeout()).await;
            self.store.save(state)?;
            if report.passed() {
                return Ok(TaskFlow::Continue);
            }
        }
    }

    /// Reviewer gate: review the diff, commit any fixes, force a checks
    /// re-run, and pause the run on explicit rejection.
    async fn review_task(
        &self,
        state: &mut ConductorState,
        task_id: &str,
        base_sha: &str,
        verification: &VerificationConfig,
        working_dir: &Path,
    ) -> Result<TaskFlow> {
        let has_commits = state
            .dag
            .as_ref()
            .unwrap()
            .get(task_id)
            .map(|t| !t.commit_shas.is_empty())
            .unwrap_or(false);
        if !has_commits {
            return Ok(TaskFlow::Continue);
        }

        let diff = self.git.diff_since(base_sha)?;
        if diff.trim().is_empty() {
            return Ok(TaskFlow::Continue);
        }

        println!("  Running reviewer...");
        let outcome = {
            let dag = state.dag.as_ref().unwrap();
            let task = dag.get(task_id).unwrap();
            let request = ReviewRequest {
                task,
                dag,
                diff: &diff,
            };
            match self.reviewer.review(request).await {
                Ok(outcome) => outcome,
                Err(Error::Timeout(_)) => {
                    return self.handle_phase_timeout(state, task_id, "reviewer session");
                }
                Err(e) => return Err(e),
            }
        };

        {
            let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
            task.usage.reviewer_input_tokens += outcome.usage.input_tokens;
            task.usage.reviewer_output_tokens += outcome.usage.output_tokens;
            task.usage.reviewer_cost_usd += outcome.usage.cost_usd;
        }
        self.store.save(state)?;

        // Any reviewer fixes become another tagged commit.
        let message = format!("conductor: {} - reviewer fixes", task_id);
        let fixes_committed = match self.commit_with_retry(&message) {
            Ok(Some(sha)) => {
                println!("  Reviewer committed fixes: {:.8}", sha);
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.record_commit(&sha);
                self.store.save(state)?;
                true
            }
            Ok(None) => false,
            Err(e) => {
                let reason = e.to_string();
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.fail(&reason);
                self.store.save(state)?;
                return Ok(TaskFlow::Continue);
            }
        };

        // Fixes (or claimed fixes) force the checks gate to run again.
        if fixes_committed || outcome.fixes_applied {
            let report = run_checks(verification, working_dir, self.config.check_timeout()).await;
            if !report.passed() {
                let context: String =
                    report.failure_context().chars().take(ERROR_CONTEXT_LIMIT).collect();
                println!("  Task {} FAILED: checks failed after reviewer", task_id);
                let task = state.dag.as_mut().unwrap().get_mut(task_id).unwrap();
                task.fail(&context);
                self.store.save(state)?;
                return Ok(TaskFlow::Continue);
            }
        }

        if !outcome.approved {
            // The in-flight task is deliberately left InProgress so resume
            // resets it to Pending and retries it verbatim.
            clog!("reviewer requested attention on task {}", task_id);
            println!("  Reviewer requested attention on task {}", task_id);
            return Ok(TaskFlow::Stop(RunStatus::Paused {
                reason: format!("reviewer requested attention on task {}", task_id),
            }));
        }

        Ok(TaskFlow::Continue)
    }
}
