//! Error types for the harness
//!
//! The taxonomy separates failures that abort the whole run (scenario
//! documents that cannot be loaded) from failures fatal to a single
//! scenario (provisioning, setup) and failures that are recorded but
//! never abort anything (agent transport errors become step output).

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Scenario Loading ===
    #[error("failed to read scenario '{path}': {error}")]
    ScenarioRead { path: String, error: String },

    #[error("failed to parse scenario '{path}': {error}")]
    ScenarioParse { path: String, error: String },

    // === Sandbox Provisioning ===
    #[error("sandbox provisioning failed: {0}")]
    Provision(String),

    // === Setup Commands ===
    #[error("setup command {index} failed (exit {exit_code}): {command}\n{output}")]
    SetupCommand {
        index: usize,
        exit_code: i32,
        command: String,
        output: String,
    },

    // === Agent Transport ===
    #[error("agent command failed (exit {exit_code})\nOutput: {output}")]
    AgentTransport { exit_code: i32, output: String },

    // === Configuration ===
    #[error("invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
