//! `MockExecutor`: a test double for `RemoteExecutor`.
//!
//! Records every request it receives (in call order) and answers according to
//! rules keyed on a substring of the script. Scripts that match no rule
//! succeed with exit code 0 and echo the script back as output.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{ExecutionOutcome, ExecutionRequest, RemoteError, RemoteExecutor};

/// Behaviour injected into `MockExecutor` for matching scripts.
#[derive(Clone)]
pub enum MockBehaviour {
    /// Exit 0 with the given output.
    Succeed(String),
    /// Run, but exit with the given non-zero code.
    Exit(i32),
    /// Fail before running, as a broken transport would.
    TransportError(String),
    /// Park until the gate is notified, then exit 0.
    Hold(Arc<Notify>),
}

/// A mock executor that records every call it receives.
#[derive(Default)]
pub struct MockExecutor {
    rules: Mutex<Vec<(String, MockBehaviour)>>,
    /// All requests seen by this executor (in call order).
    pub calls: Arc<Mutex<Vec<ExecutionRequest>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer scripts containing `pattern` with `behaviour`. Earlier rules win.
    pub fn on(&self, pattern: impl Into<String>, behaviour: MockBehaviour) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((pattern.into(), behaviour));
    }

    /// Scripts containing `pattern` exit with `exit_code`.
    pub fn fail_on(&self, pattern: impl Into<String>, exit_code: i32) {
        self.on(pattern, MockBehaviour::Exit(exit_code));
    }

    /// Scripts containing `pattern` raise a transport error.
    pub fn error_on(&self, pattern: impl Into<String>, message: impl Into<String>) {
        self.on(pattern, MockBehaviour::TransportError(message.into()));
    }

    /// Scripts containing `pattern` block until the returned gate is notified.
    pub fn hold_on(&self, pattern: impl Into<String>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.on(pattern, MockBehaviour::Hold(Arc::clone(&gate)));
        gate
    }

    /// Number of times `execute` has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// The scripts received so far, in call order.
    pub fn scripts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.script.clone())
            .collect()
    }

    fn behaviour_for(&self, script: &str) -> Option<MockBehaviour> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(pattern, _)| script.contains(pattern.as_str()))
            .map(|(_, behaviour)| behaviour.clone())
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, RemoteError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match self.behaviour_for(&request.script) {
            None => Ok(ExecutionOutcome::from_exit_code(0, request.script.clone())),
            Some(MockBehaviour::Succeed(output)) => Ok(ExecutionOutcome::from_exit_code(0, output)),
            Some(MockBehaviour::Exit(code)) => Ok(ExecutionOutcome::from_exit_code(code, "")),
            Some(MockBehaviour::TransportError(msg)) => Err(RemoteError::Transport(msg)),
            Some(MockBehaviour::Hold(gate)) => {
                gate.notified().await;
                Ok(ExecutionOutcome::from_exit_code(0, request.script.clone()))
            }
        }
    }
}
