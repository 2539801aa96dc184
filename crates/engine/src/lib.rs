//! `engine` crate: the pipeline run engine.
//!
//! A run walks its pipeline's stages in order, and each stage walks its steps
//! in order. Every step is one script dispatched through a
//! [`remote::RemoteExecutor`]; its outcome is persisted as a step run and
//! decides, together with the step's `continue_on_error` flag, whether the
//! run carries on.
//!
//! [`Orchestrator`] is the entry point: it queues runs, drains the queue with
//! a bounded number of workers, and answers status queries from the
//! [`RunRegistry`].

pub mod config;
pub mod error;
pub mod models;
pub mod substitute;
pub mod plan;
pub mod step;
pub mod stage;
pub mod registry;
pub mod orchestrator;

pub use config::OrchestratorConfig;
pub use error::{EngineError, StepError};
pub use models::{RunContext, RunRequest, RunSnapshot, StepSnapshot};
pub use substitute::substitute;
pub use plan::{load_plan, ExecutionPlan, StagePlan};
pub use step::{StepExecutor, StepOutcome};
pub use stage::{StageOutcome, StageRunner};
pub use registry::RunRegistry;
pub use orchestrator::Orchestrator;

pub use db::models::{RunStatus, StepRunStatus, TriggerKind};
