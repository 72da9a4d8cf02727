//! Waveboard
//!
//! A task-management server driven by an AI coding assistant over stdio
//! JSON-RPC. For each connected project it keeps a structured task record
//! (plans, steps, Expected Visible Results, logs) in lockstep with a
//! human-editable Markdown panel:
//! - tolerant panel parser and canonical renderer with stable anchors
//! - lazy sync engine (diff, conflict resolution, audit)
//! - EVR lifecycle with plan/task completion gates
//! - file-locked task store under `.wave/`

pub mod error;
pub mod evr;
pub mod mcp;
pub mod panel;
pub mod project;
pub mod sync;
pub mod task;

use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Location of the global project registry.
    pub registry_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let registry_path = std::env::var("WAVE_HOME")
            .map(|home| PathBuf::from(home).join("projects.json"))
            .unwrap_or_else(|_| project::ProjectRegistry::default_path());
        Self { registry_path }
    }
}
