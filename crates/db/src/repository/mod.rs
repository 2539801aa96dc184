//! Repository functions: one function per database operation.
//!
//! Every function takes a `&PgPool` and returns a `Result<T, DbError>`.
//! Plain SQL only: no business logic and no engine types.

pub mod definitions;
pub mod runs;
