//! Headless coding-agent executor.
//!
//! Runs the backing agent CLI non-interactively (`-p` with JSON output) and
//! parses the response into a structured result, including the session id
//! used to continue a conversation across turns.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::agents::SessionUsage;
use crate::{clog_debug, clog_trace, Error, Result};

/// The result of an agent execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Success { output: String },
    Error { message: String },
}

/// Parsed response from one headless agent invocation.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Session id for continuation via `--resume`.
    pub session_id: Option<String>,
    pub result: ResultType,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub num_turns: Option<u32>,
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.result, ResultType::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { output } => Some(output),
            ResultType::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { .. } => None,
            ResultType::Error { message } => Some(message),
        }
    }

    /// Usage accounted to the invocation (zeros when the CLI omitted it).
    pub fn usage(&self) -> SessionUsage {
        SessionUsage {
            input_tokens: self.input_tokens.unwrap_or(0),
            output_tokens: self.output_tokens.unwrap_or(0),
            cost_usd: self.cost_usd.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    subtype: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
    num_turns: Option<u32>,
    usage: Option<RawUsage>,
    #[serde(default)]
    error: Option<String>,
}

/// Headless executor for the backing agent CLI.
#[derive(Debug, Clone)]
pub struct AgentCli {
    binary: PathBuf,
    model: String,
    timeout: Duration,
}

impl AgentCli {
    /// Resolve the agent binary on PATH.
    pub fn new(agent_cmd: &str, model: &str, timeout: Duration) -> Result<Self> {
        let binary = which::which(agent_cmd)
            .map_err(|_| Error::AgentBinaryNotFound(agent_cmd.to_string()))?;
        Ok(Self {
            binary,
            model: model.to_string(),
            timeout,
        })
    }

    /// Use an explicit binary path (tests, non-standard installs).
    pub fn with_binary(binary: PathBuf, model: &str, timeout: Duration) -> Self {
        Self {
            binary,
            model: model.to_string(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute one prompt, optionally resuming a prior session.
    pub async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        resume_session: Option<&str>,
    ) -> Result<AgentResponse> {
        clog_debug!(
            "AgentCli::execute cwd={} resume={:?} prompt_len={}",
            cwd.display(),
            resume_session,
            prompt.len()
        );

        let mut command = Command::new(&self.binary);
        command
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json")
            .arg("--model")
            .arg(&self.model)
            .current_dir(cwd)
            .kill_on_drop(true);
        if let Some(session) = resume_session {
            command.arg("--resume").arg(session);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(Error::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        clog_trace!("agent stdout: {}", stdout.trim());
        if !stderr.trim().is_empty() {
            clog_trace!("agent stderr: {}", stderr.trim());
        }

        if let Ok(response) = Self::parse_json_response(&stdout) {
            clog_debug!(
                "agent session={:?} turns={:?} cost={:?}",
                response.session_id,
                response.num_turns,
                response.cost_usd
            );
            return Ok(response);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "Agent exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(AgentResponse {
                session_id: None,
                result: ResultType::Error { message },
                cost_usd: None,
                input_tokens: None,
                output_tokens: None,
                num_turns: None,
            });
        }

        // Non-JSON success output; shouldn't happen with --output-format json.
        Ok(AgentResponse {
            session_id: None,
            result: ResultType::Success {
                output: stdout.trim().to_string(),
            },
            cost_usd: None,
            input_tokens: None,
            output_tokens: None,
            num_turns: None,
        })
    }

    pub fn parse_json_response(json_str: &str) -> Result<AgentResponse> {
        let raw: RawResponse = serde_json::from_str(json_str)?;

        let result = match raw.subtype.as_deref() {
            Some("success") => ResultType::Success {
                output: raw.result.unwrap_or_default(),
            },
            Some("error") => ResultType::Error {
                message: raw.error.or(raw.result).unwrap_or_default(),
            },
            _ => {
                if let Some(error) = raw.error {
                    ResultType::Error { message: error }
                } else if let Some(result) = raw.result {
                    ResultType::Success { output: result }
                } else {
                    ResultType::Error {
                        message: "Unknown response format".to_string(),
                    }
                }
            }
        };

        Ok(AgentResponse {
            session_id: raw.session_id,
            result,
            cost_usd: raw.total_cost_usd,
            input_tokens: raw.usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: raw.usage.as_ref().and_then(|u| u.output_tokens),
            num_turns: raw.num_turns,
        })
    }
}
