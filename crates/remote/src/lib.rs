//! `remote` crate: the `RemoteExecutor` trait and its implementations.
//!
//! The engine never talks to a host directly. Every step is dispatched through
//! a [`RemoteExecutor`] trait object, which runs a script on a named host under
//! a resolved credential and reports back an exit code and captured output.

pub mod error;
pub mod traits;
pub mod process;
pub mod mock;

pub use error::RemoteError;
pub use traits::{Credential, ExecutionOutcome, ExecutionRequest, RemoteExecutor};
pub use process::CommandExecutor;
