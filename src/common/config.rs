//! Configuration file handling
//!
//! Optional TOML config at the user config dir; CLI flags override
//! whatever is set here.

use serde::Deserialize;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Agent subprocess settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Agent subprocess settings
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Binary invoked for prompt steps
    #[serde(default = "default_agent_program")]
    pub program: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
        }
    }
}

fn default_agent_program() -> String {
    "claude".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Per-step timeout (shell commands and agent sends)
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    /// Timeout for git commands run on behalf of assertions
    #[serde(default = "default_assertion_secs")]
    pub assertion_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            assertion_secs: default_assertion_secs(),
        }
    }
}

fn default_step_secs() -> u64 {
    120
}
fn default_assertion_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path)?;
                return toml::from_str(&content)
                    .map_err(|e| super::Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }
}
