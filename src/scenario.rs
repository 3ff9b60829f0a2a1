//! Scenario document model
//!
//! Defines the data structures for deserializing YAML test scenarios.
//! The raw `run`/`prompt` fields of a step are validated at load time
//! into a tagged [`StepAction`], so the mutually-exclusive pair can never
//! reach the runner in an ambiguous state.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};

/// A complete test scenario loaded from a YAML file
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Name of the scenario; defaults to the source file path
    #[serde(default)]
    pub name: String,
    /// Unit (default) or integration; integration scenarios are skipped
    /// in unit-only mode and vice versa
    #[serde(default, alias = "type")]
    pub kind: ScenarioKind,
    /// Override for the marketplace plugin directory
    #[serde(default)]
    pub plugin_dir: Option<String>,
    /// Optional git-backed sandbox configuration
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
    /// Shell commands run before any step; first failure aborts the scenario
    #[serde(default)]
    pub setup: Vec<String>,
    /// Shell commands run after all steps, best-effort
    #[serde(default)]
    pub teardown: Vec<String>,
    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Scenario classification for mode filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    #[default]
    Unit,
    Integration,
}

/// What gets provisioned for a scenario sandbox
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxConfig {
    /// Build a bare remote + working clone with a seed commit
    #[serde(default)]
    pub git: bool,
    /// Construct a local marketplace whose plugin entry is a symlink to
    /// the real plugin source tree
    #[serde(default)]
    pub plugin_link: bool,
    /// Run the plugin's `scripts/sandbox-setup.sh` inside the working
    /// copy; failure aborts provisioning
    #[serde(default)]
    pub setup_hook: bool,
    /// Write the plugin's enablement config and best-effort run its
    /// `scripts/plugin-preflight.sh`
    #[serde(default)]
    pub plugin_config: bool,
    /// Seed files: relative path -> content, committed before any step
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// A single test step — a shell command, an agent prompt, or an
/// assertion-only no-op.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    /// Turn cap for prompt steps; 0 means "use the default"
    pub max_turns: u32,
    /// When non-empty, replaces the sticky tool-permission list for this
    /// and all subsequent steps
    pub allowed_tools: Vec<String>,
    /// Start a fresh agent conversation before this step
    pub new_session: bool,
    pub assertions: Vec<Assertion>,
}

/// The action a step performs, exactly one by construction
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run a shell command in the work dir
    Shell(String),
    /// Send a natural-language prompt to the agent
    Prompt(String),
    /// No action; assertions run against empty output and exit code 0
    None,
}

/// Wire form of a step; `run` and `prompt` are sibling optional fields in
/// YAML and collapse into [`StepAction`] here.
#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    name: String,
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    max_turns: u32,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    new_session: bool,
    #[serde(default)]
    assertions: Vec<Assertion>,
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> std::result::Result<Self, String> {
        let action = match (raw.run, raw.prompt) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "step '{}' sets both 'run' and 'prompt'",
                    raw.name
                ))
            }
            (Some(run), None) => StepAction::Shell(run),
            (None, Some(prompt)) => StepAction::Prompt(prompt),
            (None, None) => StepAction::None,
        };
        Ok(Step {
            name: raw.name,
            action,
            max_turns: raw.max_turns,
            allowed_tools: raw.allowed_tools,
            new_session: raw.new_session,
            assertions: raw.assertions,
        })
    }
}

/// A single declarative check evaluated after a step completes.
///
/// The kind stays a plain string here; it is matched against the closed
/// enumeration at evaluation time so an unknown kind fails that one
/// assertion instead of the whole document.
#[derive(Debug, Clone, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: String,
    /// Path relative to the sandbox root, where applicable
    #[serde(default)]
    pub path: String,
    /// Kind-specific payload (substring, expected exit code, "key" or
    /// "key=value")
    #[serde(default)]
    pub value: String,
    /// Invert the result
    #[serde(default)]
    pub negate: bool,
}

/// Load a scenario from a YAML file, defaulting its name to the path.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::ScenarioRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let mut scenario: Scenario =
        serde_yaml::from_str(&content).map_err(|e| Error::ScenarioParse {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

    if scenario.name.is_empty() {
        scenario.name = path.display().to_string();
    }

    Ok(scenario)
}
