//! Read access to pipeline definitions and the records steps depend on.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{CredentialRow, HostRow, PipelineRow, ScriptRow, StageRow, StepRow},
};

/// Fetch a single pipeline by its primary key.
pub async fn get_pipeline(pool: &PgPool, id: Uuid) -> Result<PipelineRow, DbError> {
    sqlx::query_as::<_, PipelineRow>(
        r#"SELECT id, name, created_at FROM pipelines WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound { entity: "pipeline", id })
}

/// All stages of a pipeline, ordered by position.
pub async fn list_stages(pool: &PgPool, pipeline_id: Uuid) -> Result<Vec<StageRow>, DbError> {
    let rows = sqlx::query_as::<_, StageRow>(
        r#"
        SELECT id, pipeline_id, name, position
        FROM stages
        WHERE pipeline_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// All steps of a stage, ordered by position.
pub async fn list_steps(pool: &PgPool, stage_id: Uuid) -> Result<Vec<StepRow>, DbError> {
    let rows = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT id, stage_id, name, position, script_id, inline_script, host_id, continue_on_error
        FROM steps
        WHERE stage_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(stage_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn get_script(pool: &PgPool, id: Uuid) -> Result<Option<ScriptRow>, DbError> {
    let row = sqlx::query_as::<_, ScriptRow>(
        r#"SELECT id, name, content FROM scripts WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn get_host(pool: &PgPool, id: Uuid) -> Result<Option<HostRow>, DbError> {
    let row = sqlx::query_as::<_, HostRow>(
        r#"SELECT id, name, address, credential_id FROM hosts WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn get_credential(pool: &PgPool, id: Uuid) -> Result<Option<CredentialRow>, DbError> {
    let row = sqlx::query_as::<_, CredentialRow>(
        r#"SELECT id, username, password, domain FROM credentials WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
