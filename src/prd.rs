//! PRD input: markdown with optional YAML frontmatter.
//!
//! A frontmatter block carrying a literal `tasks` list bypasses the Planner
//! collaborator entirely; the resulting DAG is still validated before any
//! task executes. Without frontmatter the Planner is invoked with the PRD
//! text and a bounded project tree listing.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

use crate::checks::VerificationConfig;
use crate::config::ConductorConfig;
use crate::core::{Task, TaskDAG};
use crate::{clog, Error, Result};

/// A loaded PRD: the markdown body plus any parsed frontmatter.
#[derive(Debug, Clone)]
pub struct PrdDocument {
    pub text: String,
    pub frontmatter: Option<PrdFrontmatter>,
}

/// Literal task list embedded in PRD frontmatter.
#[derive(Debug, Clone, Deserialize)]
pub struct PrdFrontmatter {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub verification: Option<VerificationConfig>,
    pub tasks: Vec<PrdTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrdTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn frontmatter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\A---\s*\n(.*?)\n---\s*\n(.*)\z").expect("frontmatter regex")
    })
}

/// Load a PRD file, splitting off a leading `---` fenced YAML block if present.
pub fn load_prd(path: &Path) -> Result<PrdDocument> {
    let raw = std::fs::read_to_string(path)?;
    parse_prd(&raw)
}

/// Parse PRD text. A malformed frontmatter block is a validation error, not
/// a silent fallthrough to the Planner.
pub fn parse_prd(raw: &str) -> Result<PrdDocument> {
    match frontmatter_regex().captures(raw) {
        Some(caps) => {
            let yaml = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let frontmatter: PrdFrontmatter = serde_yaml::from_str(yaml)
                .map_err(|e| Error::Validation(format!("PRD frontmatter: {}", e)))?;
            Ok(PrdDocument {
                text: body.to_string(),
                frontmatter: Some(frontmatter),
            })
        }
        None => Ok(PrdDocument {
            text: raw.to_string(),
            frontmatter: None,
        }),
    }
}

/// Build a validated DAG from frontmatter tasks.
///
/// Explicit CLI command overrides win over frontmatter verification values.
pub fn dag_from_frontmatter(
    frontmatter: &PrdFrontmatter,
    config: &ConductorConfig,
) -> Result<TaskDAG> {
    if frontmatter.tasks.is_empty() {
        return Err(Error::Validation(
            "PRD frontmatter has an empty tasks list".to_string(),
        ));
    }

    let project_name = frontmatter
        .project_name
        .clone()
        .unwrap_or_else(|| "unnamed".to_string());
    let mut dag = TaskDAG::new(&project_name);

    let fm_verification = frontmatter.verification.clone().unwrap_or_default();
    dag.verification = VerificationConfig {
        test_cmd: config.test_cmd.clone().or(fm_verification.test_cmd),
        lint_cmd: config.lint_cmd.clone().or(fm_verification.lint_cmd),
        typecheck_cmd: config
            .typecheck_cmd
            .clone()
            .or(fm_verification.typecheck_cmd),
    };

    for entry in &frontmatter.tasks {
        if dag.get(&entry.id).is_some() {
            return Err(Error::Validation(format!(
                "Duplicate task id in PRD frontmatter: {}",
                entry.id
            )));
        }
        let mut task = Task::new(&entry.id, &entry.title, config.max_task_attempts);
        task.description = entry.description.clone().unwrap_or_default();
        task.acceptance_criteria = entry.acceptance_criteria.clone();
        task.depends_on = entry.depends_on.iter().cloned().collect();
        dag.add_task(task);
    }

    dag.validate()?;
    clog!(
        "Loaded {} tasks from PRD frontmatter for project '{}'",
        dag.len(),
        dag.project_name
    );
    Ok(dag)
}

/// Bounded directory listing used as Planner context.
///
/// Walks at most `max_depth` levels, skipping VCS and dependency dirs.
pub fn project_tree(dir: &Path, max_depth: usize) -> String {
    const SKIP: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

    fn walk(dir: &Path, prefix: &Path, depth: usize, max_depth: usize, out: &mut Vec<String>) {
        if depth > max_depth {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut names: Vec<_> = entries.flatten().collect();
        names.sort_by_key(|e| e.file_name());
        for entry in names {
            let name = entry.file_name();
            let name_str = name.to_string_lossy().to_string();
            if SKIP.contains(&name_str.as_str()) {
                continue;
            }
            let rel = prefix.join(&name_str);
            out.push(rel.display().to_string());
            if entry.path().is_dir() {
                walk(&entry.path(), &rel, depth + 1, max_depth, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(dir, Path::new("."), 1, max_depth, &mut out);
    out.join("\n")
}
