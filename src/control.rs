//! Operator control: pause/cancel sentinels and Ctrl-C handling.
//!
//! A run watches its session directory for `pause` and `cancel` sentinel
//! files, and carries a `CancellationToken` that the Ctrl-C handler trips.
//! Either path resolves to a graceful stop after the in-flight phase
//! transition has been persisted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{clog, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Control surface for a single run.
#[derive(Debug, Clone)]
pub struct RunControl {
    session_dir: PathBuf,
    token: CancellationToken,
}

impl RunControl {
    /// Create the control surface, ensuring the session directory exists.
    pub fn new(session_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&session_dir)?;
        Ok(Self {
            session_dir,
            token: CancellationToken::new(),
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn sentinel(&self, name: &str) -> PathBuf {
        self.session_dir.join(name)
    }

    /// True when a cancel sentinel exists or Ctrl-C was received.
    pub fn cancel_requested(&self) -> bool {
        self.token.is_cancelled() || self.sentinel("cancel").exists()
    }

    pub fn pause_requested(&self) -> bool {
        self.sentinel("pause").exists()
    }

    /// Block while the pause sentinel exists. Returns false when a cancel
    /// arrives during the wait.
    pub async fn wait_while_paused(&self) -> bool {
        let mut announced = false;
        while self.pause_requested() {
            if self.cancel_requested() {
                return false;
            }
            if !announced {
                clog!("Conductor paused; waiting for resume");
                println!("Conductor paused; waiting for resume...");
                announced = true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        if announced {
            clog!("Conductor resumed");
            println!("Conductor resumed.");
        }
        true
    }

    /// Spawn the Ctrl-C listener that cancels the token.
    pub fn install_ctrl_c_handler(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                clog!("Ctrl-C received; stopping after current phase");
                token.cancel();
            }
        });
    }

    /// Remove any leftover sentinel files (on clean run completion).
    pub fn clear_sentinels(&self) {
        let _ = std::fs::remove_file(self.sentinel("pause"));
        let _ = std::fs::remove_file(self.sentinel("cancel"));
    }
}
