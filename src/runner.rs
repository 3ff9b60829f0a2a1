//! Scenario execution
//!
//! Drives one scenario through its phases: mode filter, sandbox
//! provisioning, setup commands, steps, teardown, cleanup. Execution is
//! strictly sequential — scenarios run one at a time, steps run one at a
//! time, and the sandbox tree is exclusively owned by the running
//! scenario, so no locking is needed anywhere.
//!
//! Fatal phases (provisioning, setup) abort with zero results; step-level
//! failures (agent transport, assertions) are recorded and never abort.
//! Cleanup runs on every exit path unless the operator asked to keep the
//! work tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assertions::{self, AssertionContext};
use crate::common::Error;
use crate::exec::{InvokeOutcome, InvokeRequest, Invoker};
use crate::sandbox::Sandbox;
use crate::scenario::{Assertion, Scenario, ScenarioKind, StepAction};
use crate::session::Session;

/// Turn cap applied when a prompt step leaves `max_turns` unset or zero.
const DEFAULT_MAX_TURNS: u32 = 3;

/// Runner behavior knobs, resolved from CLI flags and the config file.
#[derive(Debug, Clone)]
pub struct Options {
    pub plugin_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    /// Keep sandbox and temp dirs for post-mortem inspection
    pub keep: bool,
    pub unit_only: bool,
    pub integration_only: bool,
    /// Per-step timeout (shell commands and agent sends)
    pub timeout: Duration,
    /// Cap on git commands run for assertions
    pub assertion_timeout: Duration,
    /// Agent binary invoked for prompt steps
    pub agent_program: String,
}

/// Outcome of one assertion within a step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_name: String,
    pub assertion: Assertion,
    pub pass: bool,
    /// Empty when passing and non-negated
    pub detail: String,
}

/// All results for one scenario. An empty result list means the scenario
/// did not run: filtered out, provisioning failure, or setup failure.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub scenario_name: String,
    pub results: Vec<StepResult>,
}

/// Ambient state threaded through setup, steps, and teardown.
struct RunContext {
    work_dir: PathBuf,
    remote_dir: Option<PathBuf>,
    /// Environment overlay for every invoked process
    env: Vec<(String, String)>,
    /// Plugin dir handed to agent sessions (local marketplace wins)
    session_plugin_dir: Option<PathBuf>,
}

impl RunContext {
    /// Replace `$WORK_DIR` and `$REMOTE_DIR` tokens in a command.
    fn expand(&self, command: &str) -> String {
        let mut expanded =
            command.replace("$WORK_DIR", &self.work_dir.display().to_string());
        if let Some(remote) = &self.remote_dir {
            expanded = expanded.replace("$REMOTE_DIR", &remote.display().to_string());
        }
        expanded
    }
}

/// Execute a single scenario and collect its report.
pub async fn run_scenario(
    invoker: &dyn Invoker,
    scenario: &Scenario,
    opts: &Options,
) -> Report {
    let mut report = Report {
        scenario_name: scenario.name.clone(),
        results: Vec::new(),
    };

    // FILTER
    if opts.unit_only && scenario.kind == ScenarioKind::Integration {
        tracing::debug!(scenario = %scenario.name, "skipping integration scenario in unit-only mode");
        return report;
    }
    if opts.integration_only && scenario.kind != ScenarioKind::Integration {
        tracing::debug!(scenario = %scenario.name, "skipping unit scenario in integration-only mode");
        return report;
    }

    let plugin_root =
        resolve_plugin_dir(scenario.plugin_dir.as_deref(), opts.plugin_dir.as_deref());

    // PROVISION
    let mut sandbox: Option<Sandbox> = None;
    if let Some(cfg) = scenario.sandbox.as_ref().filter(|cfg| cfg.git) {
        let mut sb = match Sandbox::create() {
            Ok(sb) => sb,
            Err(e) => {
                eprintln!("Error provisioning sandbox: {e}");
                return report;
            }
        };
        if let Err(e) = sb.build(invoker, plugin_root.as_deref(), cfg).await {
            eprintln!("Error provisioning sandbox: {e}");
            if !opts.keep {
                sb.cleanup();
            }
            return report;
        }
        sandbox = Some(sb);
    }

    // Resolve the work dir; an ad hoc temp dir is cleaned like a sandbox.
    let mut scratch: Option<PathBuf> = None;
    let work_dir = match (&sandbox, &opts.work_dir) {
        (Some(sb), _) => sb.work_dir.clone(),
        (None, Some(dir)) => dir.clone(),
        (None, None) => {
            match tempfile::Builder::new().prefix("agent-harness-").tempdir() {
                Ok(dir) => {
                    let path = dir.keep();
                    scratch = Some(path.clone());
                    path
                }
                Err(e) => {
                    eprintln!("Error creating temp dir: {e}");
                    return report;
                }
            }
        }
    };

    let remote_dir = sandbox.as_ref().map(|sb| sb.remote_dir.clone());
    let local_plugin_dir = sandbox.as_ref().and_then(|sb| sb.plugin_dir.clone());

    tracing::debug!(work_dir = %work_dir.display(), "scenario work dir");
    if let Some(remote) = &remote_dir {
        tracing::debug!(remote_dir = %remote.display(), "scenario remote dir");
    }

    let mut env = vec![
        ("WORK_DIR".to_string(), work_dir.display().to_string()),
        (
            "CLAUDE_PROJECT_DIR".to_string(),
            work_dir.display().to_string(),
        ),
    ];
    if let Some(dir) = &plugin_root {
        env.push(("PLUGIN_DIR".to_string(), dir.display().to_string()));
    }
    if let Some(dir) = &remote_dir {
        env.push(("REMOTE_DIR".to_string(), dir.display().to_string()));
    }
    if let Some(dir) = &local_plugin_dir {
        env.push(("LOCAL_PLUGIN_DIR".to_string(), dir.display().to_string()));
    }

    let ctx = RunContext {
        work_dir,
        remote_dir,
        env,
        session_plugin_dir: local_plugin_dir.or(plugin_root),
    };

    report.results = run_phases(invoker, scenario, opts, &ctx).await;

    if !opts.keep {
        if let Some(sb) = &sandbox {
            sb.cleanup();
        }
        if let Some(dir) = &scratch {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    report
}

/// SETUP, STEPS, and TEARDOWN. Returns the collected step results; an
/// early return on setup failure leaves them empty.
async fn run_phases(
    invoker: &dyn Invoker,
    scenario: &Scenario,
    opts: &Options,
    ctx: &RunContext,
) -> Vec<StepResult> {
    let mut results = Vec::new();

    // SETUP: first failure aborts the scenario, teardown included.
    for (i, raw) in scenario.setup.iter().enumerate() {
        let command = ctx.expand(raw);
        tracing::debug!(index = i + 1, command = %command, "setup");
        let outcome = shell(invoker, ctx, &command, opts.timeout).await;
        if !outcome.success() {
            let err = Error::SetupCommand {
                index: i + 1,
                exit_code: outcome.exit_code,
                command,
                output: outcome.output,
            };
            eprintln!("  {err}");
            return results;
        }
    }

    // STEPS
    let mut session = Session::new(
        &opts.agent_program,
        &ctx.work_dir,
        ctx.session_plugin_dir.clone(),
    );

    for step in &scenario.steps {
        if step.new_session {
            session = Session::new(
                &opts.agent_program,
                &ctx.work_dir,
                ctx.session_plugin_dir.clone(),
            );
        }
        if !step.allowed_tools.is_empty() {
            session.allowed_tools = step.allowed_tools.clone();
        }

        let mut output = String::new();
        let mut exit_code = 0;

        match &step.action {
            StepAction::Shell(raw) => {
                let command = ctx.expand(raw);
                tracing::debug!(step = %step.name, command = %command, "run");
                let outcome = shell(invoker, ctx, &command, opts.timeout).await;
                output = outcome.output;
                exit_code = outcome.exit_code;
                tracing::debug!(
                    step = %step.name,
                    exit_code,
                    output = %crate::common::truncate(&output, 200),
                    "step finished"
                );
            }
            StepAction::Prompt(text) => {
                if opts.unit_only {
                    tracing::debug!(step = %step.name, "skipping prompt step in unit-only mode");
                    continue;
                }
                let max_turns = if step.max_turns == 0 {
                    DEFAULT_MAX_TURNS
                } else {
                    step.max_turns
                };
                tracing::debug!(
                    step = %step.name,
                    prompt = %crate::common::truncate(text, 80),
                    "prompt"
                );
                // The session layer passes no timeout of its own; the
                // whole send is bounded here.
                match tokio::time::timeout(
                    opts.timeout,
                    session.send(invoker, text, max_turns),
                )
                .await
                {
                    Ok(Ok(response)) => output = response.text,
                    Ok(Err(e)) => {
                        eprintln!("  Agent error in step {:?}: {e}", step.name);
                        output = e.to_string();
                    }
                    Err(_) => {
                        let message =
                            format!("agent send timed out after {}s", opts.timeout.as_secs());
                        eprintln!("  Agent error in step {:?}: {message}", step.name);
                        output = message;
                    }
                }
            }
            StepAction::None => {}
        }

        // Assertions never abort the scenario.
        let assertion_ctx = AssertionContext {
            invoker,
            work_dir: &ctx.work_dir,
            output: &output,
            exit_code,
            git_timeout: opts.assertion_timeout,
        };
        for assertion in &step.assertions {
            let verdict = assertions::check_assertion(&assertion_ctx, assertion).await;
            results.push(StepResult {
                step_name: step.name.clone(),
                assertion: assertion.clone(),
                pass: verdict.pass,
                detail: verdict.detail,
            });
        }
    }

    // TEARDOWN: best-effort, failures swallowed.
    for (i, raw) in scenario.teardown.iter().enumerate() {
        let command = ctx.expand(raw);
        tracing::debug!(index = i + 1, command = %command, "teardown");
        let _ = shell(invoker, ctx, &command, opts.timeout).await;
    }

    results
}

async fn shell(
    invoker: &dyn Invoker,
    ctx: &RunContext,
    command: &str,
    timeout: Duration,
) -> InvokeOutcome {
    let req = InvokeRequest::shell(command, &ctx.work_dir)
        .envs(ctx.env.iter().cloned())
        .timeout(timeout);
    match invoker.invoke(req).await {
        Ok(outcome) => outcome,
        Err(e) => InvokeOutcome {
            output: e.to_string(),
            exit_code: 1,
        },
    }
}

/// Determine the plugin directory: CLI flag, then scenario override,
/// then walking up from the CWD looking for a marketplace manifest.
pub fn resolve_plugin_dir(
    scenario_dir: Option<&str>,
    flag_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(dir) = flag_dir {
        return Some(dir.to_path_buf());
    }
    if let Some(dir) = scenario_dir {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }

    let mut dir = std::env::current_dir().ok()?;
    loop {
        if dir.join(".claude-plugin").join("marketplace.json").exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}
