//! Process invocation
//!
//! Every external command the harness runs — shell steps, git, the agent
//! subprocess — goes through the [`Invoker`] trait, so the engine can be
//! exercised with a scripted runner instead of real subprocesses.
//!
//! Failures that a shell user would see as an exit code (spawn failure,
//! timeout) are reported as outcomes with a non-zero code rather than as
//! errors, so shell steps and the agent transport observe them uniformly.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::Result;

/// Exit code reported when a command exceeds its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when a command cannot be spawned at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// A single command invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl InvokeRequest {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Run `command` through `bash -c` in `cwd`.
    pub fn shell(command: &str, cwd: impl Into<PathBuf>) -> Self {
        Self::new("bash", cwd).arg("-c").arg(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Combined output and exit status of a finished invocation.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    /// stdout followed by stderr
    pub output: String,
    pub exit_code: i32,
}

impl InvokeOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Narrow invocation capability the rest of the harness depends on.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, req: InvokeRequest) -> Result<InvokeOutcome>;
}

/// Real subprocess runner backed by tokio.
pub struct ProcessInvoker;

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(&self, req: InvokeRequest) -> Result<InvokeOutcome> {
        let mut cmd = Command::new(&req.program);
        cmd.args(&req.args)
            .current_dir(&req.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &req.env {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(InvokeOutcome {
                    output: format!("failed to spawn {}: {}", req.program, e),
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                })
            }
        };

        // wait_with_output owns the child; dropping it on timeout kills
        // the subprocess (kill_on_drop).
        let wait = child.wait_with_output();
        let output = match req.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(done) => done?,
                Err(_) => {
                    tracing::debug!(program = %req.program, secs = limit.as_secs(), "command timed out");
                    return Ok(InvokeOutcome {
                        output: format!("command timed out after {}s", limit.as_secs()),
                        exit_code: TIMEOUT_EXIT_CODE,
                    });
                }
            },
            None => wait.await?,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(1);

        Ok(InvokeOutcome {
            output: text,
            exit_code,
        })
    }
}
