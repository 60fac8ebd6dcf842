//! Scripted in-memory host for unit tests

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::{HostError, HostErrorKind};
use crate::host::ScriptHost;
use crate::scripts::{CHECK_ALIVE_SCRIPT, GET_STATUS_SCRIPT, INSTRUMENTATION_SCRIPT};

#[derive(Default)]
struct FakeState {
    alive: bool,
    refuse_injection: bool,
    script_failure: Option<(String, bool)>,
    statuses: VecDeque<Value>,
    other_results: VecDeque<Value>,
    scripts: Vec<String>,
    navigations: Vec<String>,
}

/// Mimics a page: the collector survives until the next navigation
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status payload; once drained, a quiet page is reported
    pub fn push_status(&self, status: Value) {
        self.state.lock().statuses.push_back(status);
    }

    /// Queue the result of the next non-collector script
    pub fn push_result(&self, result: Value) {
        self.state.lock().other_results.push_back(result);
    }

    pub fn refuse_injection(&self) {
        self.state.lock().refuse_injection = true;
    }

    /// Fail every script with a transient error
    pub fn fail_scripts(&self, message: &str) {
        self.state.lock().script_failure = Some((message.to_string(), true));
    }

    /// Fail every script with an error the host marks as permanent
    pub fn fail_scripts_permanently(&self, message: &str) {
        self.state.lock().script_failure = Some((message.to_string(), false));
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().scripts.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }
}

#[async_trait]
impl ScriptHost for FakeHost {
    async fn execute_script(&self, script: &str) -> Result<Value, HostError> {
        let mut state = self.state.lock();
        state.scripts.push(script.to_string());

        if let Some((message, retriable)) = &state.script_failure {
            return Err(HostError::new(HostErrorKind::Script)
                .retriable(*retriable)
                .with_hint(message.clone()));
        }

        if script == INSTRUMENTATION_SCRIPT {
            if state.refuse_injection {
                return Ok(Value::Null);
            }
            state.alive = true;
            return Ok(Value::Bool(true));
        }
        if script == CHECK_ALIVE_SCRIPT {
            return Ok(Value::Bool(state.alive));
        }
        if script == GET_STATUS_SCRIPT {
            if !state.alive {
                return Ok(Value::Null);
            }
            return Ok(state
                .statuses
                .pop_front()
                .unwrap_or_else(|| json!({ "pending_requests": 0 })));
        }
        Ok(state.other_results.pop_front().unwrap_or(Value::Null))
    }

    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        let mut state = self.state.lock();
        state.navigations.push(url.to_string());
        state.alive = false;
        Ok(())
    }
}
