//! The `PipelineStore` port: everything the engine reads and writes.
//!
//! Methods are per entity; callers never see a query language. Both
//! [`PgStore`](crate::PgStore) and [`MemoryStore`](crate::MemoryStore)
//! implement it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CredentialRow, HostRow, PipelineRow, RunRow, RunStatus, ScriptRow, StageRow, StepRow,
    StepRunResult, StepRunRow,
};
use crate::DbError;

#[async_trait]
pub trait PipelineStore: Send + Sync {
    // ------ definitions ------

    /// Fails with [`DbError::NotFound`] when the pipeline does not exist.
    async fn get_pipeline(&self, id: Uuid) -> Result<PipelineRow, DbError>;

    /// Stages of a pipeline, ascending by `position`.
    async fn list_stages(&self, pipeline_id: Uuid) -> Result<Vec<StageRow>, DbError>;

    /// Steps of a stage, ascending by `position`.
    async fn list_steps(&self, stage_id: Uuid) -> Result<Vec<StepRow>, DbError>;

    async fn get_script(&self, id: Uuid) -> Result<Option<ScriptRow>, DbError>;

    async fn get_host(&self, id: Uuid) -> Result<Option<HostRow>, DbError>;

    async fn get_credential(&self, id: Uuid) -> Result<Option<CredentialRow>, DbError>;

    // ------ runs ------

    async fn insert_run(&self, run: &RunRow) -> Result<(), DbError>;

    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError>;

    /// `queued → running`, stamping `started_at`.
    ///
    /// Returns `false` (and changes nothing) unless the run is still queued.
    async fn mark_run_started(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DbError>;

    /// Moves a run to a terminal status, stamping `ended_at`.
    ///
    /// Returns `false` (and changes nothing) if the run is already terminal.
    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<bool, DbError>;

    // ------ step runs ------

    async fn insert_step_run(&self, step_run: &StepRunRow) -> Result<(), DbError>;

    async fn finish_step_run(&self, id: Uuid, result: &StepRunResult) -> Result<(), DbError>;
}
