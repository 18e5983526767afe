//! Conductor: a crash-safe, resumable task scheduler that drives a
//! dependency graph of work items through an implement -> commit -> verify
//! -> review pipeline with bounded retries.

pub mod agents;
pub mod checks;
pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod git;
pub mod log;
pub mod prd;
pub mod scheduler;
pub mod state;

pub use error::{Error, Result};
