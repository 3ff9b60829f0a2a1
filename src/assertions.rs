//! Assertion evaluation
//!
//! Each assertion kind is a predicate over three evidence sources: the
//! sandbox filesystem, the step's captured output, and its exit code.
//! Git-backed kinds shell out through the invoker with a bounded timeout.
//!
//! Negation inverts the result. When negation flips a failure into a
//! pass the detail is cleared; when it flips a pass into a failure a
//! generic message replaces the (now irrelevant) positive-case detail.
//! An unknown kind is a hard fail naming the kind, negation or not.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::common::truncate;
use crate::exec::{InvokeOutcome, InvokeRequest, Invoker};
use crate::scenario::Assertion;

/// The closed set of assertion kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    FileExists,
    FileNotExists,
    FileContains,
    FileNotContains,
    OutputContains,
    OutputNotContains,
    ExitCode,
    JsonField,
    ConfigValue,
    SymlinkExists,
    GitLogContains,
    GitStatusClean,
    RemoteHasRef,
}

impl FromStr for AssertionKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "file_exists" => Ok(Self::FileExists),
            "file_not_exists" => Ok(Self::FileNotExists),
            "file_contains" => Ok(Self::FileContains),
            "file_not_contains" => Ok(Self::FileNotContains),
            "output_contains" => Ok(Self::OutputContains),
            "output_not_contains" => Ok(Self::OutputNotContains),
            "exit_code" => Ok(Self::ExitCode),
            "json_field" => Ok(Self::JsonField),
            "config_value" => Ok(Self::ConfigValue),
            "symlink_exists" => Ok(Self::SymlinkExists),
            "git_log_contains" => Ok(Self::GitLogContains),
            "git_status_clean" => Ok(Self::GitStatusClean),
            "remote_has_ref" => Ok(Self::RemoteHasRef),
            _ => Err(()),
        }
    }
}

/// Evidence an assertion is evaluated against.
pub struct AssertionContext<'a> {
    pub invoker: &'a dyn Invoker,
    /// Sandbox root; assertion paths resolve relative to it
    pub work_dir: &'a Path,
    /// The step's captured output
    pub output: &'a str,
    /// The step's exit code (0 for prompt and no-op steps)
    pub exit_code: i32,
    /// Cap on git commands run for derived evidence
    pub git_timeout: Duration,
}

/// Outcome of one assertion: pass/fail plus diagnostic detail (empty on
/// a passing, non-negated check).
#[derive(Debug, Clone)]
pub struct Verdict {
    pub pass: bool,
    pub detail: String,
}

/// Evaluate a single assertion against the current state.
pub async fn check_assertion(ctx: &AssertionContext<'_>, assertion: &Assertion) -> Verdict {
    let Ok(kind) = assertion.kind.parse::<AssertionKind>() else {
        return Verdict {
            pass: false,
            detail: format!("unknown assertion type {:?}", assertion.kind),
        };
    };

    let (mut pass, mut detail) = evaluate(ctx, kind, assertion).await;

    if assertion.negate {
        pass = !pass;
        if pass {
            detail.clear();
        } else {
            detail = format!(
                "negated assertion unexpectedly passed for type {:?}",
                assertion.kind
            );
        }
    }

    Verdict { pass, detail }
}

async fn evaluate(
    ctx: &AssertionContext<'_>,
    kind: AssertionKind,
    a: &Assertion,
) -> (bool, String) {
    match kind {
        AssertionKind::FileExists => {
            let path = ctx.work_dir.join(&a.path);
            if path.exists() {
                (true, String::new())
            } else {
                (false, format!("file {:?} does not exist", a.path))
            }
        }

        AssertionKind::FileNotExists => {
            let path = ctx.work_dir.join(&a.path);
            match fs::metadata(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => (true, String::new()),
                _ => (false, format!("file {:?} exists (expected not to)", a.path)),
            }
        }

        AssertionKind::FileContains => {
            let path = ctx.work_dir.join(&a.path);
            match fs::read_to_string(&path) {
                Err(e) => (false, format!("cannot read {:?}: {}", a.path, e)),
                Ok(content) if content.contains(&a.value) => (true, String::new()),
                Ok(_) => (
                    false,
                    format!("file {:?} does not contain {:?}", a.path, a.value),
                ),
            }
        }

        AssertionKind::FileNotContains => {
            let path = ctx.work_dir.join(&a.path);
            match fs::read_to_string(&path) {
                // Missing file: content can't contain the value, so pass
                Err(_) => (true, String::new()),
                Ok(content) if content.contains(&a.value) => (
                    false,
                    format!("file {:?} contains {:?} (expected not to)", a.path, a.value),
                ),
                Ok(_) => (true, String::new()),
            }
        }

        AssertionKind::OutputContains => {
            if ctx.output.contains(&a.value) {
                (true, String::new())
            } else {
                (
                    false,
                    format!(
                        "output does not contain {:?} (got: {})",
                        a.value,
                        truncate(ctx.output, 200)
                    ),
                )
            }
        }

        AssertionKind::OutputNotContains => {
            if ctx.output.contains(&a.value) {
                (
                    false,
                    format!("output contains {:?} (expected not to)", a.value),
                )
            } else {
                (true, String::new())
            }
        }

        AssertionKind::ExitCode => match a.value.parse::<i32>() {
            Err(_) => (false, format!("invalid exit_code value {:?}", a.value)),
            Ok(expected) if ctx.exit_code == expected => (true, String::new()),
            Ok(expected) => (
                false,
                format!("exit code {} != expected {}", ctx.exit_code, expected),
            ),
        },

        AssertionKind::JsonField => {
            let path = ctx.work_dir.join(&a.path);
            match fs::read_to_string(&path) {
                Err(e) => (false, format!("cannot read {:?}: {}", a.path, e)),
                Ok(data) if check_json_field(&data, &a.value) => (true, String::new()),
                Ok(_) => (
                    false,
                    format!("JSON field check failed for {:?} in {:?}", a.value, a.path),
                ),
            }
        }

        AssertionKind::ConfigValue => {
            let path = ctx.work_dir.join(&a.path);
            match fs::read_to_string(&path) {
                Err(e) => (false, format!("cannot read {:?}: {}", a.path, e)),
                Ok(data) if check_json_field(&data, &a.value) => (true, String::new()),
                Ok(_) => (
                    false,
                    format!("config field check failed for {:?} in {:?}", a.value, a.path),
                ),
            }
        }

        AssertionKind::SymlinkExists => {
            let path = ctx.work_dir.join(&a.path);
            match fs::symlink_metadata(&path) {
                Err(_) => (false, format!("path {:?} does not exist", a.path)),
                Ok(meta) if meta.file_type().is_symlink() => (true, String::new()),
                Ok(_) => (
                    false,
                    format!("path {:?} exists but is not a symlink", a.path),
                ),
            }
        }

        AssertionKind::GitLogContains => {
            let outcome = run_git(ctx, "git log --oneline 2>/dev/null").await;
            if !outcome.success() {
                (false, "git log failed".to_string())
            } else if outcome.output.contains(&a.value) {
                (true, String::new())
            } else {
                (false, format!("git log does not contain {:?}", a.value))
            }
        }

        AssertionKind::GitStatusClean => {
            let outcome = run_git(ctx, "git status --porcelain 2>/dev/null").await;
            if !outcome.success() {
                (false, "git status failed".to_string())
            } else if outcome.output.trim().is_empty() {
                (true, String::new())
            } else {
                (
                    false,
                    format!(
                        "git working tree is not clean: {}",
                        outcome.output.trim()
                    ),
                )
            }
        }

        AssertionKind::RemoteHasRef => {
            let command = format!(
                "git -C {:?} show-ref --verify {} 2>/dev/null",
                a.path, a.value
            );
            let outcome = run_git(ctx, &command).await;
            if outcome.success() {
                (true, String::new())
            } else {
                (
                    false,
                    format!("remote {:?} does not have ref {:?}", a.path, a.value),
                )
            }
        }
    }
}

async fn run_git(ctx: &AssertionContext<'_>, command: &str) -> InvokeOutcome {
    let req = InvokeRequest::shell(command, ctx.work_dir).timeout(ctx.git_timeout);
    match ctx.invoker.invoke(req).await {
        Ok(outcome) => outcome,
        Err(e) => InvokeOutcome {
            output: e.to_string(),
            exit_code: 1,
        },
    }
}

/// Key check on a flat JSON object.
///
/// `"key"` checks presence; `"key=value"` additionally compares the
/// stringified field value.
fn check_json_field(data: &str, value: &str) -> bool {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(data) else {
        return false;
    };

    let (key, expected) = match value.split_once('=') {
        Some((key, expected)) => (key, Some(expected)),
        None => (value, None),
    };

    let Some(field) = obj.get(key) else {
        return false;
    };

    match expected {
        Some(want) => json_value_string(field) == want,
        None => true,
    }
}

fn json_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedInvoker;
    use std::path::PathBuf;

    fn assertion(kind: &str, path: &str, value: &str, negate: bool) -> Assertion {
        Assertion {
            kind: kind.to_string(),
            path: path.to_string(),
            value: value.to_string(),
            negate,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        invoker: ScriptedInvoker,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            Self {
                _dir: dir,
                root,
                invoker: ScriptedInvoker::always_ok(),
            }
        }

        fn ctx<'a>(&'a self, output: &'a str, exit_code: i32) -> AssertionContext<'a> {
            AssertionContext {
                invoker: &self.invoker,
                work_dir: &self.root,
                output,
                exit_code,
                git_timeout: Duration::from_secs(30),
            }
        }
    }

    #[tokio::test]
    async fn file_exists_and_its_detail() {
        let fx = Fixture::new();
        std::fs::write(fx.root.join("present.txt"), "x").unwrap();

        let verdict =
            check_assertion(&fx.ctx("", 0), &assertion("file_exists", "present.txt", "", false))
                .await;
        assert!(verdict.pass);
        assert!(verdict.detail.is_empty());

        let verdict =
            check_assertion(&fx.ctx("", 0), &assertion("file_exists", "missing.txt", "", false))
                .await;
        assert!(!verdict.pass);
        assert_eq!(verdict.detail, "file \"missing.txt\" does not exist");
    }

    #[tokio::test]
    async fn file_contains_asymmetry_on_missing_files() {
        let fx = Fixture::new();

        // missing file: file_contains fails...
        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("file_contains", "gone.txt", "needle", false),
        )
        .await;
        assert!(!verdict.pass);

        // ...but file_not_contains passes
        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("file_not_contains", "gone.txt", "needle", false),
        )
        .await;
        assert!(verdict.pass);
    }

    #[tokio::test]
    async fn file_contains_matches_substrings() {
        let fx = Fixture::new();
        std::fs::write(fx.root.join("README.md"), "# Test Project\n").unwrap();

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("file_contains", "README.md", "Test Project", false),
        )
        .await;
        assert!(verdict.pass);

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("file_contains", "README.md", "absent", false),
        )
        .await;
        assert_eq!(
            verdict.detail,
            "file \"README.md\" does not contain \"absent\""
        );
    }

    #[tokio::test]
    async fn output_contains_truncates_long_output_in_detail() {
        let fx = Fixture::new();
        let long_output = "x".repeat(500);

        let verdict = check_assertion(
            &fx.ctx(&long_output, 0),
            &assertion("output_contains", "", "needle", false),
        )
        .await;
        assert!(!verdict.pass);
        assert!(verdict.detail.contains("..."));
        assert!(verdict.detail.len() < 300);
    }

    #[tokio::test]
    async fn negated_output_contains_passes_with_empty_detail() {
        let fx = Fixture::new();
        let verdict = check_assertion(
            &fx.ctx("all good", 0),
            &assertion("output_contains", "", "ERROR", true),
        )
        .await;
        assert!(verdict.pass);
        assert!(verdict.detail.is_empty());
    }

    #[tokio::test]
    async fn negation_flipping_pass_to_fail_uses_generic_detail() {
        let fx = Fixture::new();
        let verdict = check_assertion(
            &fx.ctx("contains ERROR text", 0),
            &assertion("output_contains", "", "ERROR", true),
        )
        .await;
        assert!(!verdict.pass);
        assert_eq!(
            verdict.detail,
            "negated assertion unexpectedly passed for type \"output_contains\""
        );
    }

    #[tokio::test]
    async fn negation_is_an_involution() {
        let fx = Fixture::new();
        std::fs::write(fx.root.join("a.txt"), "hay").unwrap();
        let cases = [
            ("file_exists", "a.txt", ""),
            ("file_exists", "zz.txt", ""),
            ("file_contains", "a.txt", "hay"),
            ("file_not_contains", "a.txt", "hay"),
            ("output_contains", "", "hay"),
            ("exit_code", "", "0"),
        ];
        for (kind, path, value) in cases {
            let plain = check_assertion(&fx.ctx("hay", 0), &assertion(kind, path, value, false))
                .await;
            let negated = check_assertion(&fx.ctx("hay", 0), &assertion(kind, path, value, true))
                .await;
            assert_ne!(plain.pass, negated.pass, "kind {kind}");
        }
    }

    #[tokio::test]
    async fn exit_code_exact_match_and_details() {
        let fx = Fixture::new();

        let verdict =
            check_assertion(&fx.ctx("", 1), &assertion("exit_code", "", "0", false)).await;
        assert!(!verdict.pass);
        assert_eq!(verdict.detail, "exit code 1 != expected 0");

        let verdict =
            check_assertion(&fx.ctx("", 2), &assertion("exit_code", "", "2", false)).await;
        assert!(verdict.pass);

        let verdict =
            check_assertion(&fx.ctx("", 0), &assertion("exit_code", "", "zero", false)).await;
        assert!(!verdict.pass);
        assert_eq!(verdict.detail, "invalid exit_code value \"zero\"");
    }

    #[tokio::test]
    async fn json_field_presence_and_equality() {
        let fx = Fixture::new();
        std::fs::write(
            fx.root.join("state.json"),
            r#"{"enabled": true, "count": 3, "label": "ready"}"#,
        )
        .unwrap();

        for value in ["enabled", "enabled=true", "count=3", "label=ready"] {
            let verdict = check_assertion(
                &fx.ctx("", 0),
                &assertion("json_field", "state.json", value, false),
            )
            .await;
            assert!(verdict.pass, "value {value}");
        }

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("json_field", "state.json", "missing", false),
        )
        .await;
        assert!(!verdict.pass);
        assert_eq!(
            verdict.detail,
            "JSON field check failed for \"missing\" in \"state.json\""
        );

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("json_field", "state.json", "label=busy", false),
        )
        .await;
        assert!(!verdict.pass);
    }

    #[tokio::test]
    async fn config_value_shares_the_json_semantics() {
        let fx = Fixture::new();
        std::fs::write(fx.root.join("config.json"), r#"{"enabled": true}"#).unwrap();

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("config_value", "config.json", "enabled=true", false),
        )
        .await;
        assert!(verdict.pass);

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("config_value", "config.json", "missing", false),
        )
        .await;
        assert_eq!(
            verdict.detail,
            "config field check failed for \"missing\" in \"config.json\""
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_exists_does_not_dereference() {
        let fx = Fixture::new();
        std::fs::write(fx.root.join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(fx.root.join("real.txt"), fx.root.join("link.txt")).unwrap();

        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("symlink_exists", "link.txt", "", false),
        )
        .await;
        assert!(verdict.pass);

        // a regular file is not a symlink
        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("symlink_exists", "real.txt", "", false),
        )
        .await;
        assert!(!verdict.pass);
        assert_eq!(
            verdict.detail,
            "path \"real.txt\" exists but is not a symlink"
        );

        // dangling symlink still counts: no dereference
        std::os::unix::fs::symlink(fx.root.join("gone.txt"), fx.root.join("dangling.txt"))
            .unwrap();
        let verdict = check_assertion(
            &fx.ctx("", 0),
            &assertion("symlink_exists", "dangling.txt", "", false),
        )
        .await;
        assert!(verdict.pass);
    }

    #[tokio::test]
    async fn git_log_contains_runs_through_the_invoker() {
        let fx = Fixture::new();
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok("abc123 initial commit\n")]);
        let ctx = AssertionContext {
            invoker: &invoker,
            work_dir: &fx.root,
            output: "",
            exit_code: 0,
            git_timeout: Duration::from_secs(30),
        };

        let verdict =
            check_assertion(&ctx, &assertion("git_log_contains", "", "initial", false)).await;
        assert!(verdict.pass);

        let command = &invoker.requests()[0];
        assert_eq!(command.program, "bash");
        assert!(command.args[1].contains("git log --oneline"));
    }

    #[tokio::test]
    async fn git_status_clean_details_the_dirty_tree() {
        let fx = Fixture::new();
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok(" M src/lib.rs\n")]);
        let ctx = AssertionContext {
            invoker: &invoker,
            work_dir: &fx.root,
            output: "",
            exit_code: 0,
            git_timeout: Duration::from_secs(30),
        };

        let verdict = check_assertion(&ctx, &assertion("git_status_clean", "", "", false)).await;
        assert!(!verdict.pass);
        assert_eq!(verdict.detail, "git working tree is not clean: M src/lib.rs");
    }

    #[tokio::test]
    async fn unknown_kind_is_a_hard_fail_even_when_negated() {
        let fx = Fixture::new();

        let verdict =
            check_assertion(&fx.ctx("", 0), &assertion("quantum_entangled", "", "", false)).await;
        assert!(!verdict.pass);
        assert_eq!(
            verdict.detail,
            "unknown assertion type \"quantum_entangled\""
        );

        let verdict =
            check_assertion(&fx.ctx("", 0), &assertion("quantum_entangled", "", "", true)).await;
        assert!(!verdict.pass, "negation must not rescue an unknown kind");
    }
}
