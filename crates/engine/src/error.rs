//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors that abort a whole run (definition loading and persistence).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The run references a pipeline that does not exist.
    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    /// Two stages of a pipeline, or two steps of a stage, share an `order`.
    #[error("{scope} '{owner}' has more than one entry at position {position}")]
    DuplicatePosition {
        scope: &'static str,
        owner: String,
        position: i32,
    },

    /// The orchestrator no longer accepts runs.
    #[error("orchestrator is shutting down")]
    ShuttingDown,

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

/// Errors local to one step.
///
/// These never abort a run by themselves: the step executor records them on
/// the step run and reports the step as failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step '{step}' has no script content")]
    MissingScript { step: String },

    #[error("step '{step}' has no target host configured")]
    MissingHost { step: String },

    #[error("host {0} not found")]
    HostNotFound(Uuid),

    #[error("host '{host}' has no credential configured")]
    MissingCredential { host: String },

    #[error("credential {0} not found")]
    CredentialNotFound(Uuid),

    #[error("remote execution failed: {0}")]
    Remote(#[from] remote::RemoteError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
