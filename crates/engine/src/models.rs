//! Engine-side types: run requests, per-run context, and the status
//! snapshots observers poll.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use db::models::{RunStatus, StepRunStatus, TriggerKind};

// ---------------------------------------------------------------------------
// RunRequest
// ---------------------------------------------------------------------------

/// Everything a caller supplies to queue a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub pipeline_id: Uuid,
    /// Who or what triggered the run (user name, webhook source, …).
    pub triggered_by: String,
    pub trigger_type: TriggerKind,
    /// Substitution variables for every step script.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl RunRequest {
    /// A manual run with no variables.
    pub fn manual(pipeline_id: Uuid, triggered_by: impl Into<String>) -> Self {
        Self {
            pipeline_id,
            triggered_by: triggered_by.into(),
            trigger_type: TriggerKind::Manual,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// What a step needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub pipeline_id: Uuid,
    pub variables: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Live view of one step run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step_run_id: Uuid,
    pub stage_name: String,
    pub step_name: String,
    pub status: StepRunStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Live view of one run, as served by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub pipeline_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Steps executed so far, in execution order.
    pub steps: Vec<StepSnapshot>,
    /// Human-readable progress lines.
    pub logs: Vec<String>,
}

impl RunSnapshot {
    pub fn queued(run_id: Uuid, pipeline_id: Uuid) -> Self {
        Self {
            run_id,
            pipeline_id,
            status: RunStatus::Queued,
            started_at: None,
            ended_at: None,
            error: None,
            steps: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
