//! Execution plan: the pipeline snapshot a run executes against.
//!
//! The whole graph (pipeline, stages, steps) is loaded once when the run
//! starts, so later edits to the definition cannot change a run midway.
//!
//! Rules enforced:
//! 1. Stages execute in ascending `position`; steps within a stage likewise.
//! 2. Positions must be unique among the stages of a pipeline and among the
//!    steps of a stage. A tie has no defined order and fails the run.

use tracing::debug;
use uuid::Uuid;

use db::models::{PipelineRow, StageRow, StepRow};
use db::PipelineStore;

use crate::EngineError;

/// One stage together with its ordered steps.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage: StageRow,
    pub steps: Vec<StepRow>,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub pipeline: PipelineRow,
    pub stages: Vec<StagePlan>,
}

impl ExecutionPlan {
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }
}

/// Load and validate the plan for `pipeline_id`.
///
/// # Errors
/// - [`EngineError::PipelineNotFound`] if the pipeline does not exist.
/// - [`EngineError::DuplicatePosition`] on an ordering tie.
/// - [`EngineError::Database`] if any query fails.
pub async fn load_plan(
    store: &dyn PipelineStore,
    pipeline_id: Uuid,
) -> Result<ExecutionPlan, EngineError> {
    let pipeline = match store.get_pipeline(pipeline_id).await {
        Ok(pipeline) => pipeline,
        Err(e) if e.is_not_found() => return Err(EngineError::PipelineNotFound(pipeline_id)),
        Err(e) => return Err(e.into()),
    };

    let stages = store.list_stages(pipeline_id).await?;
    let mut planned = Vec::with_capacity(stages.len());
    for stage in stages {
        let steps = store.list_steps(stage.id).await?;
        planned.push(StagePlan { stage, steps });
    }

    let plan = build_plan(pipeline, planned)?;
    debug!(
        pipeline_id = %pipeline_id,
        stages = plan.stages.len(),
        steps = plan.step_count(),
        "execution plan loaded"
    );
    Ok(plan)
}

/// Sort stages and steps by position and reject ties.
pub fn build_plan(
    pipeline: PipelineRow,
    mut stages: Vec<StagePlan>,
) -> Result<ExecutionPlan, EngineError> {
    sort_unique(&mut stages, |s| s.stage.position, "pipeline", &pipeline.name)?;
    for stage in &mut stages {
        let owner = stage.stage.name.clone();
        sort_unique(&mut stage.steps, |s| s.position, "stage", &owner)?;
    }
    Ok(ExecutionPlan { pipeline, stages })
}

fn sort_unique<T>(
    items: &mut [T],
    position: impl Fn(&T) -> i32,
    scope: &'static str,
    owner: &str,
) -> Result<(), EngineError> {
    items.sort_by_key(|item| position(item));
    for pair in items.windows(2) {
        let pos = position(&pair[0]);
        if pos == position(&pair[1]) {
            return Err(EngineError::DuplicatePosition {
                scope,
                owner: owner.to_owned(),
                position: pos,
            });
        }
    }
    Ok(())
}
