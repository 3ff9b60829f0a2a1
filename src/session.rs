//! Agent session management
//!
//! Gives the runner the illusion of a stateful multi-turn conversation
//! over the agent CLI's stateless JSON contract: each send replays the
//! continuation token from the previous response, and a response that
//! carries a new token replaces the held one.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::exec::{InvokeRequest, Invoker};

/// Parsed JSON output from the agent's `--output-format json` mode.
///
/// Every field is optional on the wire; absent fields fall back to their
/// defaults so partial responses still produce a usable result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, rename = "result")]
    pub text: String,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub total_cost_usd: f64,
}

/// One agent conversation: the continuation token plus the ambient paths
/// and permissions that shape each send. Replaced wholesale when a step
/// requests a new session.
#[derive(Debug, Clone)]
pub struct Session {
    program: String,
    token: String,
    pub work_dir: PathBuf,
    pub plugin_dir: Option<PathBuf>,
    /// Sticky tool-permission list; updated forward by steps that supply
    /// a new one
    pub allowed_tools: Vec<String>,
}

impl Session {
    pub fn new(program: &str, work_dir: &Path, plugin_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.to_string(),
            token: String::new(),
            work_dir: work_dir.to_path_buf(),
            plugin_dir,
            allowed_tools: Vec::new(),
        }
    }

    /// The held continuation token, if the agent has reported one.
    pub fn continuation_token(&self) -> Option<&str> {
        if self.token.is_empty() {
            None
        } else {
            Some(self.token.as_str())
        }
    }

    /// Send a prompt, resuming the conversation if a token is held.
    ///
    /// The subprocess runs with no timeout of its own; the caller bounds
    /// the whole send. A response that parses as JSON is used regardless
    /// of the exit status. Unparseable output with a clean exit becomes
    /// the result text verbatim; unparseable output with a failing exit
    /// is the only transport error.
    pub async fn send(
        &mut self,
        invoker: &dyn Invoker,
        prompt: &str,
        max_turns: u32,
    ) -> Result<AgentResponse> {
        let mut req = InvokeRequest::new(self.program.as_str(), &self.work_dir)
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json");

        if let Some(dir) = &self.plugin_dir {
            req = req.arg("--plugin-dir").arg(dir.display().to_string());
        }
        if !self.token.is_empty() {
            req = req.arg("--resume").arg(self.token.as_str());
        }
        if max_turns > 0 {
            req = req.arg("--max-turns").arg(max_turns.to_string());
        }
        if !self.allowed_tools.is_empty() {
            req = req.arg("--allowedTools").arg(self.allowed_tools.join(","));
        }

        tracing::debug!(program = %self.program, args = ?req.args, "invoking agent");

        let outcome = invoker.invoke(req).await?;

        tracing::debug!(exit_code = outcome.exit_code, output = %outcome.output, "agent output");

        let response = match serde_json::from_str::<AgentResponse>(&outcome.output) {
            Ok(parsed) => parsed,
            Err(_) if outcome.success() => AgentResponse {
                text: outcome.output,
                ..Default::default()
            },
            Err(_) => {
                return Err(Error::AgentTransport {
                    exit_code: outcome.exit_code,
                    output: outcome.output,
                })
            }
        };

        // A token is never cleared by a response; only a new session
        // severs the conversation.
        if !response.session_id.is_empty() {
            self.token = response.session_id.clone();
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::InvokeOutcome;
    use crate::testutil::ScriptedInvoker;
    use std::path::PathBuf;

    fn session() -> Session {
        Session::new("claude", &PathBuf::from("/tmp/work"), None)
    }

    #[tokio::test]
    async fn first_send_has_no_resume_flag() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok(r#"{"result":"hi"}"#)]);
        let mut session = session();
        session.send(&invoker, "hello", 3).await.unwrap();

        let calls = invoker.requests();
        assert!(!calls[0].args.contains(&"--resume".to_string()));
        assert!(calls[0].args.contains(&"--max-turns".to_string()));
        assert!(calls[0].args.contains(&"--output-format".to_string()));
    }

    #[tokio::test]
    async fn token_is_threaded_into_the_next_send() {
        let invoker = ScriptedInvoker::new(vec![
            ScriptedInvoker::ok(r#"{"session_id":"abc-123","result":"one"}"#),
            ScriptedInvoker::ok(r#"{"result":"two"}"#),
        ]);
        let mut session = session();
        session.send(&invoker, "first", 3).await.unwrap();
        assert_eq!(session.continuation_token(), Some("abc-123"));

        session.send(&invoker, "second", 3).await.unwrap();
        let calls = invoker.requests();
        let resume_pos = calls[1].args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(calls[1].args[resume_pos + 1], "abc-123");
    }

    #[tokio::test]
    async fn empty_token_in_response_never_clears_the_held_one() {
        let invoker = ScriptedInvoker::new(vec![
            ScriptedInvoker::ok(r#"{"session_id":"abc-123","result":"one"}"#),
            ScriptedInvoker::ok(r#"{"result":"two"}"#),
        ]);
        let mut session = session();
        session.send(&invoker, "first", 3).await.unwrap();
        session.send(&invoker, "second", 3).await.unwrap();
        assert_eq!(session.continuation_token(), Some("abc-123"));
    }

    #[tokio::test]
    async fn valid_json_with_failing_exit_is_a_result_not_an_error() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::fail(
            r#"{"result":"ran out of budget","is_error":true}"#,
            1,
        )]);
        let mut session = session();
        let response = session.send(&invoker, "prompt", 3).await.unwrap();
        assert!(response.is_error);
        assert_eq!(response.text, "ran out of budget");
    }

    #[tokio::test]
    async fn plain_text_with_clean_exit_falls_back_to_raw_output() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok("just some text")]);
        let mut session = session();
        let response = session.send(&invoker, "prompt", 3).await.unwrap();
        assert_eq!(response.text, "just some text");
        assert!(!response.is_error);
    }

    #[tokio::test]
    async fn unparseable_output_with_failing_exit_is_a_transport_error() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::fail("boom", 2)]);
        let mut session = session();
        let err = session.send(&invoker, "prompt", 3).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn zero_max_turns_omits_the_flag() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok("{}")]);
        let mut session = session();
        session.send(&invoker, "prompt", 0).await.unwrap();
        assert!(!invoker.requests()[0]
            .args
            .contains(&"--max-turns".to_string()));
    }

    #[tokio::test]
    async fn allowed_tools_are_comma_joined() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok("{}")]);
        let mut session = session();
        session.allowed_tools = vec!["Read".to_string(), "Bash(git:*)".to_string()];
        session.send(&invoker, "prompt", 3).await.unwrap();
        let args = &invoker.requests()[0].args;
        let pos = args.iter().position(|a| a == "--allowedTools").unwrap();
        assert_eq!(args[pos + 1], "Read,Bash(git:*)");
    }

    #[tokio::test]
    async fn partial_json_tolerates_missing_fields() {
        let invoker = ScriptedInvoker::new(vec![ScriptedInvoker::ok(r#"{"num_turns":2}"#)]);
        let mut session = session();
        let response = session.send(&invoker, "prompt", 3).await.unwrap();
        assert_eq!(response.num_turns, 2);
        assert_eq!(response.text, "");
        assert_eq!(response.total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_transport_error() {
        // missing binary comes back as exit 127 + message, not JSON
        let invoker = ScriptedInvoker::new(vec![InvokeOutcome {
            output: "failed to spawn claude: No such file or directory".to_string(),
            exit_code: 127,
        }]);
        let mut session = session();
        let err = session.send(&invoker, "prompt", 3).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
