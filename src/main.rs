use std::path::PathBuf;

use clap::Parser;

use conductor::agents::{AgentCli, ClaudePlanner, ClaudeReviewer, ClaudeWorker};
use conductor::config::ConductorConfig;
use conductor::control::RunControl;
use conductor::git::GitOps;
use conductor::prd::{load_prd, PrdDocument};
use conductor::scheduler::{Conductor, RunSummary};
use conductor::state::{ConductorState, RunStatus, StateStore};
use conductor::{clog, clog_error, Error, Result};

/// Conduct - durable, resumable task-DAG execution from a PRD
#[derive(Parser, Debug)]
#[command(name = "conduct")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1    Enable debug logging (alternative to --debug)\n    CONDUCTOR_MODEL      Default model when --model is not given\n\nEXIT CODES:\n    0  all tasks done\n    1  unrecoverable error\n    2  blocked (failed tasks, nothing ready)\n    3  paused (resume with --resume)"
)]
pub struct Cli {
    /// Path to the PRD markdown file (required unless --resume)
    pub prd: Option<PathBuf>,

    /// Project working directory (defaults to the current directory)
    #[arg(long, default_value = ".")]
    pub working_dir: String,

    /// Model for planner/worker/reviewer sessions
    #[arg(long)]
    pub model: Option<String>,

    /// Command used to invoke the backing coding agent
    #[arg(long, default_value = "claude")]
    pub agent_cmd: String,

    /// State file path (defaults to ~/.conductor/runs/<run-id>.json)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Git branch to create/check out before the first task
    #[arg(long)]
    pub branch: Option<String>,

    /// Resume the most recent run (or the run at --state)
    #[arg(long)]
    pub resume: bool,

    /// Test command override (wins over frontmatter/planner/auto-detection)
    #[arg(long)]
    pub test_cmd: Option<String>,

    /// Lint command override
    #[arg(long)]
    pub lint_cmd: Option<String>,

    /// Typecheck command override
    #[arg(long)]
    pub typecheck_cmd: Option<String>,

    /// Skip the reviewer gate
    #[arg(long)]
    pub no_reviewer: bool,

    /// Assumed context window for worker sessions, in tokens
    #[arg(long)]
    pub context_window: Option<u64>,

    /// Fraction of the context window a session may consume before handoff
    #[arg(long)]
    pub budget_threshold: Option<f64>,

    /// Max turns within one worker session
    #[arg(long)]
    pub max_worker_turns: Option<u32>,

    /// Max worker sessions (handoffs) per task attempt
    #[arg(long)]
    pub max_worker_sessions: Option<u32>,

    /// Max attempts per task before it is marked failed
    #[arg(long)]
    pub max_task_attempts: Option<u32>,

    /// Wall-clock ceiling for each check command, in seconds
    #[arg(long)]
    pub check_timeout: Option<u64>,

    /// Wall-clock ceiling for each worker/reviewer session, in seconds
    #[arg(long)]
    pub session_timeout: Option<u64>,

    /// Team id carried opaquely in the config snapshot
    #[arg(long)]
    pub team_id: Option<String>,

    /// Project id carried opaquely in the config snapshot
    #[arg(long)]
    pub project_id: Option<String>,

    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long)]
    pub debug: bool,
}

impl Cli {
    fn into_config(self) -> Result<ConductorConfig> {
        let prd = self.prd.ok_or_else(|| {
            Error::Validation("a PRD path is required unless --resume is given".to_string())
        })?;
        let mut config = ConductorConfig {
            prd_path: prd.display().to_string(),
            working_dir: self.working_dir,
            agent_cmd: self.agent_cmd,
            state_path: self.state.map(|p| p.display().to_string()),
            test_cmd: self.test_cmd,
            lint_cmd: self.lint_cmd,
            typecheck_cmd: self.typecheck_cmd,
            enable_reviewer: !self.no_reviewer,
            git_branch: self.branch,
            team_id: self.team_id,
            project_id: self.project_id,
            ..Default::default()
        };
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(v) = self.context_window {
            config.context_window = v;
        }
        if let Some(v) = self.budget_threshold {
            config.budget_threshold = v;
        }
        if let Some(v) = self.max_worker_turns {
            config.max_worker_turns = v;
        }
        if let Some(v) = self.max_worker_sessions {
            config.max_worker_sessions = v;
        }
        if let Some(v) = self.max_task_attempts {
            config.max_task_attempts = v;
        }
        if let Some(v) = self.check_timeout {
            config.check_timeout_secs = v;
        }
        if let Some(v) = self.session_timeout {
            config.session_timeout_secs = v;
        }
        Ok(config)
    }
}

/// Load-or-create the run state and its store.
fn prepare_run(cli: Cli) -> Result<(ConductorState, StateStore)> {
    if cli.resume {
        let path = match &cli.state {
            Some(path) => path.clone(),
            None => StateStore::latest_run_path()?.ok_or_else(|| {
                Error::StateNotFound(
                    "no saved run found to resume; provide --state or run without --resume"
                        .to_string(),
                )
            })?,
        };
        let store = StateStore::new(path);
        let mut state = store.load()?;
        state.status = RunStatus::Running;
        println!("Resumed conductor run {}", state.run_id);
        clog!("Resumed run {} from {}", state.run_id, store.path().display());
        Ok((state, store))
    } else {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let config = cli.into_config()?;
        let path = match &config.state_path {
            Some(path) => PathBuf::from(path),
            None => StateStore::path_for_run(&run_id)?,
        };
        let store = StateStore::new(path);
        let state = ConductorState::new(&run_id, config);
        clog!("Starting run {} -> {}", run_id, store.path().display());
        Ok((state, store))
    }
}

async fn run(cli: Cli) -> Result<RunStatus> {
    let (mut state, store) = prepare_run(cli)?;
    let config = state.config.clone();

    let prd: PrdDocument = load_prd(std::path::Path::new(&config.prd_path))?;
    let git = GitOps::new(std::path::Path::new(&config.working_dir))?;
    let control = RunControl::new(ConductorConfig::session_dir(&state.run_id)?)?;
    control.install_ctrl_c_handler();

    let cli_agent = AgentCli::new(&config.agent_cmd, &config.model, config.session_timeout())?;
    let planner = Box::new(ClaudePlanner::new(cli_agent.clone(), config.clone()));
    let worker = Box::new(ClaudeWorker::new(
        cli_agent.clone(),
        config.clone(),
        prd.text.clone(),
    ));
    let reviewer = Box::new(ClaudeReviewer::new(cli_agent, &config));

    let conductor = Conductor::new(config, store, git, control, planner, worker, reviewer);
    let result = conductor.run(&mut state, &prd).await;

    println!("\n{}", RunSummary::from_state(&state));
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    conductor::log::init_with_debug(cli.debug);
    clog!("Conduct starting");

    match run(cli).await {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(e) => {
            clog_error!("Fatal: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
