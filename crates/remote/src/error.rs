//! Remote-execution error type.

use thiserror::Error;

/// Errors raised by a [`RemoteExecutor`](crate::RemoteExecutor) when the
/// script could not be run at all.
///
/// A script that ran and exited non-zero is *not* an error; it is reported as
/// an unsuccessful [`ExecutionOutcome`](crate::ExecutionOutcome).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The launcher process could not be spawned.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failed while feeding the script or collecting output.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport reported a failure of its own.
    #[error("transport error: {0}")]
    Transport(String),
}
