//! Result reporting
//!
//! Collects per-scenario reports, prints PASS/FAIL lines and the final
//! cross-run summary, and computes the process exit status.

use colored::Colorize;

use crate::runner::Report;
use crate::scenario::Assertion;

/// Running tally across all scenarios in a harness invocation.
#[derive(Debug, Default)]
pub struct Summary {
    pub total_pass: usize,
    pub total_fail: usize,
    pub failed_scenarios: Vec<String>,
}

impl Summary {
    /// Print one scenario's results and fold them into the tally.
    pub fn record(&mut self, report: &Report) {
        let mut pass = 0;
        let mut fail = 0;

        for result in &report.results {
            if result.pass {
                pass += 1;
                println!(
                    "  {}  {}: {}",
                    "PASS".green(),
                    result.step_name,
                    assertion_summary(&result.assertion)
                );
            } else {
                fail += 1;
                println!(
                    "  {}  {}: {}",
                    "FAIL".red(),
                    result.step_name,
                    assertion_summary(&result.assertion)
                );
                if !result.detail.is_empty() {
                    println!("        {}", result.detail.dimmed());
                }
            }
        }

        println!("  Result: {pass} passed, {fail} failed");

        self.total_pass += pass;
        self.total_fail += fail;
        if fail > 0 {
            self.failed_scenarios.push(report.scenario_name.clone());
        }
    }

    /// Print the cross-scenario summary.
    pub fn print_totals(&self) {
        println!(
            "\n=== Summary: {} passed, {} failed ===",
            self.total_pass, self.total_fail
        );
        if !self.failed_scenarios.is_empty() {
            println!("Failed scenarios:");
            for name in &self.failed_scenarios {
                println!("  - {name}");
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.total_fail > 0 {
            1
        } else {
            0
        }
    }
}

/// One-line rendering of an assertion for report output.
pub fn assertion_summary(a: &Assertion) -> String {
    let neg = if a.negate { " (negated)" } else { "" };
    match a.kind.as_str() {
        "file_exists" | "file_not_exists" | "symlink_exists" => {
            format!("{}({}){}", a.kind, a.path, neg)
        }
        "file_contains" | "file_not_contains" | "json_field" | "config_value"
        | "remote_has_ref" => {
            format!("{}({}, {:?}){}", a.kind, a.path, a.value, neg)
        }
        "output_contains" | "output_not_contains" | "git_log_contains" => {
            format!("{}({:?}){}", a.kind, a.value, neg)
        }
        "exit_code" => format!("exit_code({}){}", a.value, neg),
        "git_status_clean" => format!("git_status_clean(){}", neg),
        _ => format!("{}({}, {:?}){}", a.kind, a.path, a.value, neg),
    }
}
