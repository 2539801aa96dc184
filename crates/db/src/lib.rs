//! `db` crate: pure persistence layer.
//!
//! Provides typed row structs, the [`PipelineStore`] port the engine talks to,
//! a Postgres implementation built on repository functions, and an in-memory
//! implementation for tests and local experiments. No business logic lives here.

pub mod error;
pub mod repository;
pub mod models;
pub mod store;
pub mod postgres;
pub mod memory;

pub use error::DbError;
pub use store::PipelineStore;
pub use postgres::{DbPool, PgStore};
pub use memory::MemoryStore;
