//! Claude-CLI-backed collaborators.
//!
//! All three collaborators drive the same headless executor. The planner is
//! a single-turn call whose reply must contain a JSON task DAG; the worker is
//! a multi-turn session with budget-aware handoff; the reviewer is a
//! single-turn fix-it-yourself pass with an explicit verdict protocol.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use crate::agents::headless::AgentCli;
use crate::agents::prompts;
use crate::agents::{
    Planner, ReviewOutcome, ReviewRequest, Reviewer, SessionUsage, Worker, WorkerOutcome,
    WorkerRequest,
};
use crate::checks::VerificationConfig;
use crate::config::ConductorConfig;
use crate::core::{HandoffDocument, Task, TaskDAG};
use crate::{clog, clog_debug, clog_warn, Error, Result};

/// First JSON object embedded anywhere in free text.
fn extract_json(text: &str) -> Result<serde_json::Value> {
    for (idx, ch) in text.char_indices() {
        if ch != '{' {
            continue;
        }
        let mut stream =
            serde_json::Deserializer::from_str(&text[idx..]).into_iter::<serde_json::Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() {
                return Ok(value);
            }
        }
    }
    Err(Error::Agent(
        "No JSON object found in agent output".to_string(),
    ))
}

fn is_task_complete(text: &str) -> bool {
    text.to_uppercase().contains("TASK COMPLETE")
}

#[derive(Debug, Deserialize)]
struct PlannedTask {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    verification: Option<VerificationConfig>,
    tasks: Vec<PlannedTask>,
}

/// Planner backed by a single-turn headless session.
pub struct ClaudePlanner {
    cli: AgentCli,
    working_dir: PathBuf,
    config: ConductorConfig,
}

impl ClaudePlanner {
    pub fn new(cli: AgentCli, config: ConductorConfig) -> Self {
        Self {
            working_dir: PathBuf::from(&config.working_dir),
            cli,
            config,
        }
    }

    /// Build a validated DAG from the planner's JSON reply, applying CLI
    /// verification overrides over planner suggestions.
    fn build_dag(&self, raw: serde_json::Value) -> Result<TaskDAG> {
        let output: PlannerOutput = serde_json::from_value(raw)
            .map_err(|e| Error::Validation(format!("planner output schema: {}", e)))?;
        if output.tasks.is_empty() {
            return Err(Error::Validation("planner produced no tasks".to_string()));
        }

        let mut dag = TaskDAG::new(output.project_name.as_deref().unwrap_or("unnamed"));
        let suggested = output.verification.unwrap_or_default();
        dag.verification = VerificationConfig {
            test_cmd: self.config.test_cmd.clone().or(suggested.test_cmd),
            lint_cmd: self.config.lint_cmd.clone().or(suggested.lint_cmd),
            typecheck_cmd: self.config.typecheck_cmd.clone().or(suggested.typecheck_cmd),
        };

        for planned in &output.tasks {
            if dag.get(&planned.id).is_some() {
                return Err(Error::Validation(format!(
                    "planner produced duplicate task id {}",
                    planned.id
                )));
            }
            let mut task = Task::new(&planned.id, &planned.title, self.config.max_task_attempts);
            task.description = planned.description.clone();
            task.acceptance_criteria = planned.acceptance_criteria.clone();
            task.depends_on = planned.depends_on.iter().cloned().collect();
            dag.add_task(task);
        }

        dag.validate()?;
        Ok(dag)
    }
}

#[async_trait]
impl Planner for ClaudePlanner {
    async fn plan(&self, prd_text: &str, project_tree: &str) -> Result<TaskDAG> {
        let prompt = prompts::planner_prompt(prd_text, project_tree);
        let response = self.cli.execute(&prompt, &self.working_dir, None).await?;
        let text = response
            .output()
            .ok_or_else(|| {
                Error::Agent(format!(
                    "planner session failed: {}",
                    response.error_message().unwrap_or("unknown error")
                ))
            })?
            .to_string();
        let dag = self.build_dag(extract_json(&text)?)?;
        clog!(
            "Planner produced {} tasks for project '{}'",
            dag.len(),
            dag.project_name
        );
        Ok(dag)
    }
}

/// Worker backed by a multi-turn headless session.
///
/// Token usage is checked against the session budget after every turn; the
/// handoff document is requested from the same session (via `--resume`) so
/// the worker summarizes its own context before it is discarded.
pub struct ClaudeWorker {
    cli: AgentCli,
    working_dir: PathBuf,
    config: ConductorConfig,
    prd_text: String,
}

impl ClaudeWorker {
    pub fn new(cli: AgentCli, config: ConductorConfig, prd_text: String) -> Self {
        Self {
            working_dir: PathBuf::from(&config.working_dir),
            cli,
            config,
            prd_text,
        }
    }

    fn initial_prompt(&self, request: &WorkerRequest<'_>) -> String {
        let verification = request.dag.effective_verification(&request.task.id);
        if let Some(failure) = request.failure_context {
            return prompts::worker_retry_prompt(request.task, failure);
        }
        if let Some(handoff) = request.handoff {
            return prompts::worker_resume_prompt(request.task, &verification, handoff);
        }
        prompts::worker_initial_prompt(
            request.task,
            request.dag,
            &verification,
            &self.config.working_dir,
            &self.prd_text,
        )
    }

    fn parse_handoff(text: &str, session: u32) -> HandoffDocument {
        #[derive(Deserialize)]
        struct RawHandoff {
            summary: String,
            #[serde(default)]
            next_steps: Vec<String>,
            #[serde(default)]
            files: Vec<PathBuf>,
        }

        if let Ok(value) = extract_json(text) {
            if let Ok(raw) = serde_json::from_value::<RawHandoff>(value) {
                let mut doc = HandoffDocument::new(raw.summary, session);
                doc.next_steps = raw.next_steps;
                doc.files = raw.files;
                return doc;
            }
        }
        // Unstructured reply still beats losing the progress summary.
        HandoffDocument::new(text.trim(), session)
    }
}

#[async_trait]
impl Worker for ClaudeWorker {
    async fn run_session(&self, request: WorkerRequest<'_>) -> Result<WorkerOutcome> {
        let budget = self.config.session_budget();
        let max_turns = self.config.max_worker_turns.max(1);
        let mut usage = SessionUsage::default();
        let mut session_id: Option<String> = None;
        let mut prompt = self.initial_prompt(&request);

        for turn in 1..=max_turns {
            clog_debug!(
                "worker task={} session={} turn={}/{}",
                request.task.id,
                request.session,
                turn,
                max_turns
            );
            let response = self
                .cli
                .execute(&prompt, &self.working_dir, session_id.as_deref())
                .await?;
            usage.add(&response.usage());
            session_id = response.session_id.clone().or(session_id);

            let Some(text) = response.output().map(str::to_string) else {
                return Ok(WorkerOutcome::Incomplete {
                    reason: format!(
                        "worker session error: {}",
                        response.error_message().unwrap_or("unknown error")
                    ),
                    usage,
                });
            };

            // A reply that claims completion wins even over budget; handoff
            // is only requested while work is still unfinished.
            if usage.total_tokens() >= budget && !is_task_complete(&text) {
                clog!(
                    "worker task={} over budget ({} >= {}), requesting handoff",
                    request.task.id,
                    usage.total_tokens(),
                    budget
                );
                let handoff_response = self
                    .cli
                    .execute(prompts::WORKER_HANDOFF_PROMPT, &self.working_dir, session_id.as_deref())
                    .await?;
                usage.add(&handoff_response.usage());
                let doc_text = handoff_response.output().unwrap_or(&text);
                return Ok(WorkerOutcome::Handoff {
                    doc: Self::parse_handoff(doc_text, request.session),
                    usage,
                });
            }

            if is_task_complete(&text) {
                return Ok(WorkerOutcome::Completed { usage });
            }

            prompt = prompts::WORKER_CONTINUE_PROMPT.to_string();
        }

        clog_warn!(
            "worker task={} gave no completion signal in {} turns",
            request.task.id,
            max_turns
        );
        Ok(WorkerOutcome::Incomplete {
            reason: format!("no completion signal within {} turns", max_turns),
            usage,
        })
    }
}

/// Reviewer backed by a single-turn fix-it-yourself session.
pub struct ClaudeReviewer {
    cli: AgentCli,
    working_dir: PathBuf,
}

impl ClaudeReviewer {
    pub fn new(cli: AgentCli, config: &ConductorConfig) -> Self {
        Self {
            working_dir: PathBuf::from(&config.working_dir),
            cli,
        }
    }

    /// Parse the verdict protocol. A reply with no explicit verdict counts
    /// as approved: the reviewer gate only blocks on a stated objection.
    fn parse_verdict(text: &str) -> (bool, bool) {
        let upper = text.to_uppercase();
        let approved = !upper.contains("VERDICT: NEEDS ATTENTION");
        let fixes_applied = upper.contains("FIXES APPLIED: YES");
        (approved, fixes_applied)
    }
}

#[async_trait]
impl Reviewer for ClaudeReviewer {
    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewOutcome> {
        let verification = request.dag.effective_verification(&request.task.id);
        let prompt = prompts::reviewer_prompt(request.task, &verification, request.diff);
        let response = self.cli.execute(&prompt, &self.working_dir, None).await?;
        let usage = response.usage();

        let Some(text) = response.output() else {
            return Err(Error::Agent(format!(
                "reviewer session failed: {}",
                response.error_message().unwrap_or("unknown error")
            )));
        };

        let (approved, fixes_applied) = Self::parse_verdict(text);
        Ok(ReviewOutcome {
            approved,
            fixes_applied,
            summary: text.to_string(),
            usage,
        })
    }
}
