//! Scripted invoker for unit tests
//!
//! Plays back canned outcomes in order and records every request, so the
//! session and runner logic can be exercised without real subprocesses.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::common::Result;
use crate::exec::{InvokeOutcome, InvokeRequest, Invoker};

pub struct ScriptedInvoker {
    script: Mutex<Vec<InvokeOutcome>>,
    calls: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new(outcomes: Vec<InvokeOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Invoker whose every command succeeds with empty output.
    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn ok(output: &str) -> InvokeOutcome {
        InvokeOutcome {
            output: output.to_string(),
            exit_code: 0,
        }
    }

    pub fn fail(output: &str, exit_code: i32) -> InvokeOutcome {
        InvokeOutcome {
            output: output.to_string(),
            exit_code,
        }
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, req: InvokeRequest) -> Result<InvokeOutcome> {
        self.calls.lock().unwrap().push(req);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(InvokeOutcome {
                output: String::new(),
                exit_code: 0,
            })
        } else {
            Ok(script.remove(0))
        }
    }
}
