//! Run and step-run repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{RunRow, RunStatus, StepRunResult, StepRunRow},
};

// ---------------------------------------------------------------------------
// pipeline_runs
// ---------------------------------------------------------------------------

/// Insert a new run record (normally in `queued` status).
pub async fn insert_run(pool: &PgPool, run: &RunRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs
            (id, pipeline_id, status, triggered_by, trigger_type, variables,
             error_message, created_at, started_at, ended_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(run.id)
    .bind(run.pipeline_id)
    .bind(run.status)
    .bind(&run.triggered_by)
    .bind(run.trigger_type)
    .bind(&run.variables)
    .bind(&run.error_message)
    .bind(run.created_at)
    .bind(run.started_at)
    .bind(run.ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<RunRow, DbError> {
    sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, pipeline_id, status, triggered_by, trigger_type, variables,
               error_message, created_at, started_at, ended_at
        FROM pipeline_runs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound { entity: "run", id })
}

/// Flip a queued run to `running`. Returns whether a row changed.
pub async fn mark_run_started(
    pool: &PgPool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = 'running', started_at = $1
        WHERE id = $2 AND status = 'queued'
        "#,
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a non-terminal run to `status`. Returns whether a row changed.
pub async fn finish_run(
    pool: &PgPool,
    id: Uuid,
    status: RunStatus,
    at: DateTime<Utc>,
    error_message: Option<&str>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = $1, ended_at = $2, error_message = $3
        WHERE id = $4 AND status IN ('queued', 'running')
        "#,
    )
    .bind(status)
    .bind(at)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// step_runs
// ---------------------------------------------------------------------------

pub async fn insert_step_run(pool: &PgPool, step_run: &StepRunRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO step_runs
            (id, run_id, step_id, stage_name, step_name, status, exit_code, output,
             error_message, log_path, started_at, ended_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(step_run.id)
    .bind(step_run.run_id)
    .bind(step_run.step_id)
    .bind(&step_run.stage_name)
    .bind(&step_run.step_name)
    .bind(step_run.status)
    .bind(step_run.exit_code)
    .bind(&step_run.output)
    .bind(&step_run.error_message)
    .bind(&step_run.log_path)
    .bind(step_run.started_at)
    .bind(step_run.ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn finish_step_run(
    pool: &PgPool,
    id: Uuid,
    result: &StepRunResult,
) -> Result<(), DbError> {
    let updated = sqlx::query(
        r#"
        UPDATE step_runs
        SET status = $1, exit_code = $2, output = $3, error_message = $4,
            log_path = $5, ended_at = $6
        WHERE id = $7
        "#,
    )
    .bind(result.status)
    .bind(result.exit_code)
    .bind(&result.output)
    .bind(&result.error_message)
    .bind(&result.log_path)
    .bind(result.ended_at)
    .bind(id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(DbError::MissingRow { entity: "step run", id });
    }

    Ok(())
}
