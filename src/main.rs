//! Declarative E2E harness for CLI coding agents
//!
//! Loads YAML scenarios, runs each against a fresh sandbox, prints the
//! per-scenario results and a final summary, and exits non-zero if any
//! assertion failed or any document failed to load.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use agent_harness::common::{config::Config, logging};
use agent_harness::exec::ProcessInvoker;
use agent_harness::report::Summary;
use agent_harness::runner::{self, Options};
use agent_harness::scenario;

#[derive(Parser)]
#[command(name = "agent-harness", about = "Declarative E2E test harness for CLI coding agents")]
#[command(version, long_about = None)]
struct Cli {
    /// Scenario YAML files to run, in order
    #[arg(required = true, value_name = "SCENARIO")]
    scenarios: Vec<PathBuf>,

    /// Marketplace plugin directory (default: auto-detect)
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Working directory (default: temp dir per scenario)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Don't clean up work and sandbox dirs after tests
    #[arg(long)]
    keep: bool,

    /// Skip agent-prompt steps and integration scenarios
    #[arg(long)]
    unit_only: bool,

    /// Run only integration scenarios
    #[arg(long)]
    integration_only: bool,

    /// Show full command and agent output
    #[arg(long, short)]
    verbose: bool,

    /// Per-step timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Agent binary to invoke for prompt steps
    #[arg(long)]
    agent: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let opts = Options {
        plugin_dir: cli.plugin_dir,
        work_dir: cli.work_dir,
        keep: cli.keep,
        unit_only: cli.unit_only,
        integration_only: cli.integration_only,
        timeout: Duration::from_secs(cli.timeout.unwrap_or(config.timeouts.step_secs)),
        assertion_timeout: Duration::from_secs(config.timeouts.assertion_secs),
        agent_program: cli.agent.unwrap_or(config.agent.program),
    };

    if !opts.unit_only && which::which(&opts.agent_program).is_err() {
        tracing::warn!(
            program = %opts.agent_program,
            "agent binary not found on PATH; prompt steps will fail"
        );
    }

    // Load every document before running anything; a malformed scenario
    // aborts the whole run up front.
    let mut scenarios = Vec::new();
    for path in &cli.scenarios {
        match scenario::load_scenario(path) {
            Ok(scenario) => scenarios.push(scenario),
            Err(e) => {
                eprintln!("Error loading {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    let invoker = ProcessInvoker;
    let mut summary = Summary::default();

    for scenario in &scenarios {
        println!("\n--- {} ---", scenario.name);
        let report = runner::run_scenario(&invoker, scenario, &opts).await;
        summary.record(&report);
    }

    summary.print_totals();
    std::process::exit(summary.exit_code());
}
