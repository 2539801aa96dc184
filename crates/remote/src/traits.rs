//! The `RemoteExecutor` trait: the contract every transport must fulfil.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::RemoteError;

/// A resolved login for a target host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// Optional authentication domain (e.g. an AD domain).
    pub domain: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Everything a transport needs to run one script.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Network address of the target host.
    pub host_address: String,
    /// Fully substituted script text.
    pub script: String,
    pub credential: Credential,
}

/// What came back from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: i32,
    /// Captured output (stdout followed by stderr).
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// An outcome derived purely from the exit code.
    pub fn from_exit_code(exit_code: i32, output: impl Into<String>) -> Self {
        let success = exit_code == 0;
        Self {
            success,
            exit_code,
            output: output.into(),
            error: (!success).then(|| format!("script exited with code {exit_code}")),
        }
    }
}

/// The remote execution capability.
///
/// Implementations are awaited to completion; the engine imposes no timeout.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `request.script` on `request.host_address`.
    ///
    /// Return `Err` only when the script could not be run; a script that ran
    /// and failed is an `Ok` outcome with `success == false`.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, RemoteError>;
}
