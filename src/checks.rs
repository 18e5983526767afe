//! Automated verification checks (test, lint, typecheck).
//!
//! The checks gate runs configured or auto-detected commands against the
//! working tree after every worker commit. Each command runs under an
//! enforced wall-clock ceiling; a timeout is recorded distinctly from an
//! exit-code failure so retry prompts can tell "your code is wrong" apart
//! from "your code hung".

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::{clog_debug, clog_warn};

/// Shell control operators rejected in check commands.
///
/// Check commands are split into argv and executed directly; allowing shell
/// composition here would let a planner-suggested command run arbitrary
/// pipelines.
const DISALLOWED_OPERATORS: &[&str] = &["&&", "||", ";", "|", ">", "<", "$(", "`"];

/// Verification commands for the checks gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub test_cmd: Option<String>,
    pub lint_cmd: Option<String>,
    pub typecheck_cmd: Option<String>,
}

impl VerificationConfig {
    pub fn is_empty(&self) -> bool {
        self.test_cmd.is_none() && self.lint_cmd.is_none() && self.typecheck_cmd.is_none()
    }

    /// Overlay `overrides` on top of `self`: any command set in the override
    /// wins, others fall back to `self`.
    pub fn merged_with(&self, overrides: &VerificationConfig) -> VerificationConfig {
        VerificationConfig {
            test_cmd: overrides.test_cmd.clone().or_else(|| self.test_cmd.clone()),
            lint_cmd: overrides.lint_cmd.clone().or_else(|| self.lint_cmd.clone()),
            typecheck_cmd: overrides
                .typecheck_cmd
                .clone()
                .or_else(|| self.typecheck_cmd.clone()),
        }
    }

    /// Configured commands paired with their category.
    pub fn commands(&self) -> Vec<(CheckCategory, &str)> {
        let mut out = Vec::new();
        if let Some(cmd) = self.test_cmd.as_deref() {
            out.push((CheckCategory::Test, cmd));
        }
        if let Some(cmd) = self.lint_cmd.as_deref() {
            out.push((CheckCategory::Lint, cmd));
        }
        if let Some(cmd) = self.typecheck_cmd.as_deref() {
            out.push((CheckCategory::Typecheck, cmd));
        }
        out
    }

    /// Render the commands for inclusion in collaborator prompts.
    pub fn format_for_prompt(&self) -> String {
        let mut lines = Vec::new();
        if let Some(cmd) = &self.test_cmd {
            lines.push(format!("- Test: `{}`", cmd));
        }
        if let Some(cmd) = &self.lint_cmd {
            lines.push(format!("- Lint: `{}`", cmd));
        }
        if let Some(cmd) = &self.typecheck_cmd {
            lines.push(format!("- Typecheck: `{}`", cmd));
        }
        if lines.is_empty() {
            "No verification commands configured.".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Category of a verification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Test,
    Lint,
    Typecheck,
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckCategory::Test => write!(f, "test"),
            CheckCategory::Lint => write!(f, "lint"),
            CheckCategory::Typecheck => write!(f, "typecheck"),
        }
    }
}

/// Outcome of a single check command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CheckOutcome {
    /// Command exited zero.
    Pass,
    /// Command exited non-zero or could not run.
    Fail { output: String },
    /// Command exceeded its wall-clock ceiling.
    Timeout { limit_secs: u64 },
    /// Category not applicable to this project (no command configured).
    Skipped,
}

impl CheckOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckOutcome::Fail { .. } | CheckOutcome::Timeout { .. })
    }
}

/// Result of one category within a checks run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub category: CheckCategory,
    pub command: Option<String>,
    pub outcome: CheckOutcome,
}

/// Results for every category of a single checks run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    /// The checks gate passes iff no applicable category failed or timed
    /// out. Skipped categories never fail a report.
    pub fn passed(&self) -> bool {
        !self.results.iter().any(|r| r.outcome.is_failure())
    }

    /// True if any category was cut off by its timeout.
    pub fn timed_out(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r.outcome, CheckOutcome::Timeout { .. }))
    }

    /// Combined failure output fed back to the worker on retry.
    ///
    /// Timeouts are labelled as such so the worker can distinguish a hang
    /// from an assertion failure.
    pub fn failure_context(&self) -> String {
        let mut sections = Vec::new();
        for result in &self.results {
            let cmd = result.command.as_deref().unwrap_or("<none>");
            match &result.outcome {
                CheckOutcome::Fail { output } => {
                    sections.push(format!("=== {}: {} ===\n{}", result.category, cmd, output));
                }
                CheckOutcome::Timeout { limit_secs } => {
                    sections.push(format!(
                        "=== {}: {} ===\nTIMED OUT after {}s. The command hung rather \
                         than failing an assertion.",
                        result.category, cmd, limit_secs
                    ));
                }
                CheckOutcome::Pass | CheckOutcome::Skipped => {}
            }
        }
        sections.join("\n")
    }
}

/// Run a single check command under the given timeout.
async fn run_check(cmd: &str, working_dir: &Path, timeout: Duration) -> CheckOutcome {
    if DISALLOWED_OPERATORS.iter().any(|op| cmd.contains(op)) {
        return CheckOutcome::Fail {
            output: format!("Disallowed shell operators in check command: {}", cmd),
        };
    }

    let argv = match shlex::split(cmd) {
        Some(argv) if !argv.is_empty() => argv,
        _ => {
            return CheckOutcome::Fail {
                output: format!("Could not parse check command: {}", cmd),
            }
        }
    };

    clog_debug!("run_check cmd={:?} dir={}", argv, working_dir.display());

    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(working_dir)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Err(_) => CheckOutcome::Timeout {
            limit_secs: timeout.as_secs(),
        },
        Ok(Err(e)) => CheckOutcome::Fail {
            output: format!("Command failed to start: {}: {}", argv[0], e),
        },
        Ok(Ok(output)) => {
            if output.status.success() {
                CheckOutcome::Pass
            } else {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                CheckOutcome::Fail { output: text }
            }
        }
    }
}

/// Run all configured checks against the working tree.
///
/// Categories without a command are recorded as Skipped. The report passes
/// only if every applicable category passes.
pub async fn run_checks(
    verification: &VerificationConfig,
    working_dir: &Path,
    timeout: Duration,
) -> CheckReport {
    let mut results = Vec::new();
    for category in [
        CheckCategory::Test,
        CheckCategory::Lint,
        CheckCategory::Typecheck,
    ] {
        let cmd = match category {
            CheckCategory::Test => verification.test_cmd.as_deref(),
            CheckCategory::Lint => verification.lint_cmd.as_deref(),
            CheckCategory::Typecheck => verification.typecheck_cmd.as_deref(),
        };
        let result = match cmd {
            None => CheckResult {
                category,
                command: None,
                outcome: CheckOutcome::Skipped,
            },
            Some(cmd) => {
                let outcome = run_check(cmd, working_dir, timeout).await;
                if outcome.is_failure() {
                    clog_warn!("check {} failed: {}", category, cmd);
                }
                CheckResult {
                    category,
                    command: Some(cmd.to_string()),
                    outcome,
                }
            }
        };
        results.push(result);
    }
    CheckReport { results }
}

/// Auto-detect verification commands from the project's manifest.
///
/// Only used when neither CLI overrides nor the planner supplied commands.
/// A command is suggested only when its tool binary resolves on PATH.
pub fn detect_verification(working_dir: &Path) -> VerificationConfig {
    let mut detected = VerificationConfig::default();

    if working_dir.join("Cargo.toml").exists() && is_cargo_manifest(working_dir) {
        if which::which("cargo").is_ok() {
            detected.test_cmd = Some("cargo test".to_string());
            detected.lint_cmd = Some("cargo clippy --all-targets".to_string());
        }
    } else if working_dir.join("package.json").exists() {
        detected = detect_node(working_dir);
    } else if working_dir.join("pyproject.toml").exists() {
        detected = detect_python();
    }

    clog_debug!(
        "detect_verification dir={} -> {:?}",
        working_dir.display(),
        detected
    );
    detected
}

/// Confirm Cargo.toml actually declares a package or workspace.
fn is_cargo_manifest(working_dir: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(working_dir.join("Cargo.toml")) else {
        return false;
    };
    let Ok(value) = text.parse::<toml::Value>() else {
        return false;
    };
    value.get("package").is_some() || value.get("workspace").is_some()
}

fn detect_node(working_dir: &Path) -> VerificationConfig {
    let mut detected = VerificationConfig::default();
    if which::which("npm").is_err() {
        return detected;
    }
    let Ok(text) = std::fs::read_to_string(working_dir.join("package.json")) else {
        return detected;
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&text) else {
        return detected;
    };
    let scripts = manifest.get("scripts").and_then(|s| s.as_object());
    if let Some(scripts) = scripts {
        if scripts.contains_key("test") {
            detected.test_cmd = Some("npm test".to_string());
        }
        if scripts.contains_key("lint") {
            detected.lint_cmd = Some("npm run lint".to_string());
        }
        if scripts.contains_key("typecheck") {
            detected.typecheck_cmd = Some("npm run typecheck".to_string());
        }
    }
    detected
}

fn detect_python() -> VerificationConfig {
    VerificationConfig {
        test_cmd: which::which("pytest").ok().map(|_| "pytest".to_string()),
        lint_cmd: which::which("ruff")
            .ok()
            .map(|_| "ruff check .".to_string()),
        typecheck_cmd: which::which("mypy").ok().map(|_| "mypy .".to_string()),
    }
}
