//! Postgres-backed [`PipelineStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    CredentialRow, HostRow, PipelineRow, RunRow, RunStatus, ScriptRow, StageRow, StepRow,
    StepRunResult, StepRunRow,
};
use crate::repository::{definitions, runs};
use crate::{DbError, PipelineStore};

/// Type alias for the shared Postgres pool used across the whole application.
pub type DbPool = PgPool;

/// A [`PipelineStore`] that delegates to the repository functions.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url` with at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        info!("Connecting to database (max_connections={})", max_connections);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the migrations embedded from the workspace `migrations/` directory.
    pub async fn migrate(&self) -> Result<(), DbError> {
        info!("Running database migrations");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn get_pipeline(&self, id: Uuid) -> Result<PipelineRow, DbError> {
        definitions::get_pipeline(&self.pool, id).await
    }

    async fn list_stages(&self, pipeline_id: Uuid) -> Result<Vec<StageRow>, DbError> {
        definitions::list_stages(&self.pool, pipeline_id).await
    }

    async fn list_steps(&self, stage_id: Uuid) -> Result<Vec<StepRow>, DbError> {
        definitions::list_steps(&self.pool, stage_id).await
    }

    async fn get_script(&self, id: Uuid) -> Result<Option<ScriptRow>, DbError> {
        definitions::get_script(&self.pool, id).await
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<HostRow>, DbError> {
        definitions::get_host(&self.pool, id).await
    }

    async fn get_credential(&self, id: Uuid) -> Result<Option<CredentialRow>, DbError> {
        definitions::get_credential(&self.pool, id).await
    }

    async fn insert_run(&self, run: &RunRow) -> Result<(), DbError> {
        runs::insert_run(&self.pool, run).await
    }

    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError> {
        runs::get_run(&self.pool, id).await
    }

    async fn mark_run_started(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DbError> {
        runs::mark_run_started(&self.pool, id, at).await
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<bool, DbError> {
        runs::finish_run(&self.pool, id, status, at, error_message).await
    }

    async fn insert_step_run(&self, step_run: &StepRunRow) -> Result<(), DbError> {
        runs::insert_step_run(&self.pool, step_run).await
    }

    async fn finish_step_run(&self, id: Uuid, result: &StepRunResult) -> Result<(), DbError> {
        runs::finish_step_run(&self.pool, id, result).await
    }
}
