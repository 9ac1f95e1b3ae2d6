//! Datastore adapters for seed application and verification queries
//!
//! The engine talks to the target datastore through the [`Datastore`] trait:
//! one transaction per table-seed-unit, skip-on-conflict idempotency, and
//! read-only verification queries. Two implementations are provided: an
//! embedded SQLite store and a process-local in-memory store.

pub mod adapter;
pub mod memory;
pub mod sqlite;

pub use adapter::{Datastore, SeedOutcome, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
