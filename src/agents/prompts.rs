//! Prompt templates for the planner, worker, and reviewer collaborators.

use crate::checks::VerificationConfig;
use crate::core::{HandoffDocument, Task, TaskDAG};

pub const PLANNER_PREAMBLE: &str = "\
You are a software project planner. Given a Product Requirements Document (PRD) \
and the current state of a code repository, decompose the work into a task DAG \
(directed acyclic graph) of implementation tasks.

Rules:
- Each task must be a concrete, implementable unit of work.
- Tasks that are independent must NOT modify the same files.
- Each task must have clear acceptance criteria that can be verified.
- Dependencies must form a DAG (no cycles).
- Suggest verification commands (test, lint, typecheck) if the project has them.
- Respond with ONLY a JSON object matching the schema provided.
";

pub const WORKER_PREAMBLE: &str = "\
You are an implementation agent working on a software project.

Your job is to implement the assigned task completely. Follow the acceptance \
criteria exactly. When you believe you are done, say \"TASK COMPLETE\" and \
summarize what you did.

Rules:
- Focus only on the assigned task. Do not modify unrelated code.
- Write clean, working code. Run tests if a test command is provided.
- If something is unclear, make a reasonable choice and document it.
";

pub const WORKER_CONTINUE_PROMPT: &str = "\
You did not explicitly say 'TASK COMPLETE'. Continue working on this same \
task and say 'TASK COMPLETE' only when fully done.";

pub const WORKER_HANDOFF_PROMPT: &str = "\
You are running low on context budget. Produce a structured handoff document \
so a fresh session can continue your work.

Respond with ONLY a JSON object:

```json
{
  \"summary\": \"What has been completed so far, key decisions, and current state.\",
  \"next_steps\": [\"remaining step 1\", \"remaining step 2\"],
  \"files\": [\"path/worth/rereading.rs\"]
}
```";

pub const REVIEWER_PREAMBLE: &str = "\
You are a code reviewer with developer access. You receive a diff of changes \
made for a specific task, along with the task's acceptance criteria.

Your job is to:
1. Review the diff for correctness, quality, and adherence to acceptance criteria.
2. Run the verification commands to check the changes.
3. If you find issues, fix them directly (you have file edit tools).
4. After fixing, re-run verification commands to confirm your fixes work.
5. Summarize what you found and what (if anything) you fixed.

You are NOT bouncing work back to the implementer. You fix issues yourself.

End your summary with two lines:
FIXES APPLIED: YES or FIXES APPLIED: NO
VERDICT: APPROVED or VERDICT: NEEDS ATTENTION
Use NEEDS ATTENTION only for problems you could not fix yourself.
";

pub fn format_acceptance_criteria(criteria: &[String]) -> String {
    if criteria.is_empty() {
        return "- (none given)".to_string();
    }
    criteria
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn planner_prompt(prd_text: &str, project_tree: &str) -> String {
    format!(
        "{preamble}\n\
         ## PRD\n\n{prd_text}\n\n\
         ## Existing project structure\n\n{project_tree}\n\n\
         ## Output schema\n\n\
         Respond with a single JSON object:\n\n\
         ```json\n\
         {{\n\
         \x20 \"project_name\": \"short-name\",\n\
         \x20 \"verification\": {{\n\
         \x20   \"test_cmd\": \"cargo test\" or null,\n\
         \x20   \"lint_cmd\": \"cargo clippy\" or null,\n\
         \x20   \"typecheck_cmd\": null\n\
         \x20 }},\n\
         \x20 \"tasks\": [\n\
         \x20   {{\n\
         \x20     \"id\": \"T1\",\n\
         \x20     \"title\": \"Short imperative title\",\n\
         \x20     \"description\": \"What to implement and how\",\n\
         \x20     \"acceptance_criteria\": [\"criterion 1\", \"criterion 2\"],\n\
         \x20     \"depends_on\": []\n\
         \x20   }},\n\
         \x20   {{\n\
         \x20     \"id\": \"T2\",\n\
         \x20     \"title\": \"Another task\",\n\
         \x20     \"description\": \"Details\",\n\
         \x20     \"acceptance_criteria\": [\"criterion\"],\n\
         \x20     \"depends_on\": [\"T1\"]\n\
         \x20   }}\n\
         \x20 ]\n\
         }}\n\
         ```",
        preamble = PLANNER_PREAMBLE,
        prd_text = prd_text,
        project_tree = project_tree,
    )
}

pub fn worker_initial_prompt(
    task: &Task,
    dag: &TaskDAG,
    verification: &VerificationConfig,
    working_dir: &str,
    prd_text: &str,
) -> String {
    let prd_summary = if prd_text.is_empty() {
        format!("Project: {}", dag.project_name)
    } else {
        format!("Project: {}\n\n{}", dag.project_name, prd_text)
    };
    format!(
        "{preamble}\n\
         ## Task: {id} - {title}\n\n\
         {description}\n\n\
         ## Acceptance criteria\n\n{criteria}\n\n\
         ## Project context\n\n\
         Working directory: {working_dir}\n\n\
         {prd_summary}\n\n\
         ## Verification commands\n\n{verification}\n\n\
         Implement this task now. When done, say \"TASK COMPLETE\".",
        preamble = WORKER_PREAMBLE,
        id = task.id,
        title = task.title,
        description = task.description,
        criteria = format_acceptance_criteria(&task.acceptance_criteria),
        working_dir = working_dir,
        prd_summary = prd_summary,
        verification = verification.format_for_prompt(),
    )
}

pub fn worker_resume_prompt(
    task: &Task,
    verification: &VerificationConfig,
    handoff: &HandoffDocument,
) -> String {
    format!(
        "{preamble}\n\
         You are continuing work on a task that a previous session started. \
         Here is the handoff document from the previous session:\n\n\
         ## Handoff document\n\n{handoff}\n\n\
         ## Task: {id} - {title}\n\n\
         {description}\n\n\
         ## Acceptance criteria\n\n{criteria}\n\n\
         ## Verification commands\n\n{verification}\n\n\
         Continue implementing this task from where the previous session left \
         off. When done, say \"TASK COMPLETE\".",
        preamble = WORKER_PREAMBLE,
        handoff = handoff.to_markdown(),
        id = task.id,
        title = task.title,
        description = task.description,
        criteria = format_acceptance_criteria(&task.acceptance_criteria),
        verification = verification.format_for_prompt(),
    )
}

pub fn worker_retry_prompt(task: &Task, error_output: &str) -> String {
    format!(
        "{preamble}\n\
         ## Task: {id} - {title}\n\n\
         The automated checks failed after your implementation. Here is the \
         error output:\n\n\
         ```\n{error_output}\n```\n\n\
         Fix the issues and ensure all checks pass. When done, say \
         \"TASK COMPLETE\".",
        preamble = WORKER_PREAMBLE,
        id = task.id,
        title = task.title,
        error_output = error_output,
    )
}

pub fn reviewer_prompt(task: &Task, verification: &VerificationConfig, diff_text: &str) -> String {
    format!(
        "{preamble}\n\
         ## Task: {id} - {title}\n\n\
         ## Acceptance criteria\n\n{criteria}\n\n\
         ## Diff to review\n\n\
         ```diff\n{diff_text}\n```\n\n\
         ## Verification commands\n\n{verification}\n\n\
         Review, fix any issues, run checks, and summarize your findings.",
        preamble = REVIEWER_PREAMBLE,
        id = task.id,
        title = task.title,
        criteria = format_acceptance_criteria(&task.acceptance_criteria),
        diff_text = diff_text,
        verification = verification.format_for_prompt(),
    )
}
