//! Stage runner: executes a stage's steps strictly in order.
//!
//! The fail-fast decision is taken per step: a failed step with
//! `continue_on_error = false` ends the stage (and therefore the run) at
//! once; a failed step with the flag set is counted and execution goes on.

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::RunContext;
use crate::plan::StagePlan;
use crate::registry::RunRegistry;
use crate::step::StepExecutor;
use crate::EngineError;

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every step ran. `failed_steps` counts failures that were allowed to continue.
    Completed { failed_steps: usize },
    /// A step failed without `continue_on_error`; nothing after it ran.
    Aborted { step: String, error: Option<String> },
    /// The run was cancelled before the next step started.
    Cancelled,
}

pub struct StageRunner {
    steps: StepExecutor,
    registry: Arc<RunRegistry>,
}

impl StageRunner {
    pub fn new(steps: StepExecutor, registry: Arc<RunRegistry>) -> Self {
        Self { steps, registry }
    }

    pub async fn run(&self, run: &RunContext, stage: &StagePlan) -> Result<StageOutcome, EngineError> {
        let stage_name = stage.stage.name.as_str();
        info!(run_id = %run.run_id, stage = stage_name, steps = stage.steps.len(), "stage started");
        self.registry
            .append_log(run.run_id, format!("stage '{stage_name}' started"));

        let mut failed_steps = 0;

        for step in &stage.steps {
            if self.registry.is_cancelled(run.run_id) {
                info!(run_id = %run.run_id, stage = stage_name, "run cancelled, skipping remaining steps");
                return Ok(StageOutcome::Cancelled);
            }

            let outcome = self.steps.execute(run, step, stage_name).await?;
            if outcome.succeeded() {
                continue;
            }

            if step.continue_on_error {
                warn!(
                    run_id = %run.run_id,
                    stage = stage_name,
                    step = %step.name,
                    "step failed, continuing (continue_on_error)"
                );
                failed_steps += 1;
            } else {
                return Ok(StageOutcome::Aborted {
                    step: step.name.clone(),
                    error: outcome.error,
                });
            }
        }

        Ok(StageOutcome::Completed { failed_steps })
    }
}
