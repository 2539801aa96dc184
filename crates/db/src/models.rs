//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; they carry no execution behaviour.
//! The engine crate builds its execution plan and status snapshots on top.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub use sqlx::types::Json;

// ---------------------------------------------------------------------------
// Status enumerations
// ---------------------------------------------------------------------------

/// Lifecycle of a pipeline run: `queued → running → {succeeded | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued"    => Ok(Self::Queued),
            "running"   => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed"    => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Lifecycle of one step execution: `running → {succeeded | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StepRunStatus {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StepRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Started by a person from the UI or CLI.
    Manual,
    /// Started by another system through the REST API.
    Api,
    /// Started by an incoming webhook.
    Webhook,
    /// Started by a scheduler.
    Schedule,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Api => write!(f, "api"),
            Self::Webhook => write!(f, "webhook"),
            Self::Schedule => write!(f, "schedule"),
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual"   => Ok(Self::Manual),
            "api"      => Ok(Self::Api),
            "webhook"  => Ok(Self::Webhook),
            "schedule" => Ok(Self::Schedule),
            other      => Err(format!("unknown trigger kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions: pipelines, stages, steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StageRow {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    /// Ordinal position within the pipeline; the sole ordering key.
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub stage_id: Uuid,
    pub name: String,
    /// Ordinal position within the stage; the sole ordering key.
    pub position: i32,
    /// Reference to a reusable script, used when `inline_script` is empty.
    pub script_id: Option<Uuid>,
    /// Script text run as-is. `None` or `""` defers to `script_id`; text made
    /// of whitespace alone is a misconfigured step, not a fallback.
    pub inline_script: Option<String>,
    pub host_id: Option<Uuid>,
    pub continue_on_error: bool,
}

impl StepRow {
    /// A step with no script, no host and `continue_on_error = false`.
    pub fn new(stage_id: Uuid, name: impl Into<String>, position: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage_id,
            name: name.into(),
            position,
            script_id: None,
            inline_script: None,
            host_id: None,
            continue_on_error: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Step dependencies: scripts, hosts, credentials
// ---------------------------------------------------------------------------

/// A named reusable script.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScriptRow {
    pub id: Uuid,
    pub name: String,
    pub content: Option<String>,
}

/// A target host steps can run on.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HostRow {
    pub id: Uuid,
    pub name: String,
    /// Network address handed to the remote executor.
    pub address: String,
    pub credential_id: Option<Uuid>,
}

/// A resolved login. The password is never serialised.
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub domain: Option<String>,
}

impl std::fmt::Debug for CredentialRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRow")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// pipeline_runs
// ---------------------------------------------------------------------------

/// A persisted pipeline run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub status: RunStatus,
    pub triggered_by: String,
    pub trigger_type: TriggerKind,
    /// Caller-supplied substitution variables.
    pub variables: Json<BTreeMap<String, String>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// step_runs
// ---------------------------------------------------------------------------

/// A persisted step run row. Stage and step names are copied at execution
/// time so history survives later edits to the definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepRunRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub stage_name: String,
    pub step_name: String,
    pub status: StepRunStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub log_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// The terminal half of a step run, written once the executor returns.
#[derive(Debug, Clone)]
pub struct StepRunResult {
    pub status: StepRunStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub log_path: Option<String>,
    pub ended_at: DateTime<Utc>,
}
