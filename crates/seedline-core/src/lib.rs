//! Seedline Core
//!
//! Core domain model with stable, versioned types.
//! Report field names and test kind tags are part of the public API.

pub mod config;
pub mod report;
pub mod schema;
pub mod seed;
pub mod verify;

pub use config::{Config, ConfigError, StoreConfig};
pub use report::{
    RunPhase, RunReport, RunStatus, RunSummary, SeedStatus, TableSeedReport, VerificationOutcome,
};
pub use schema::{
    Column, ColumnType, ForeignKey, ForeignKeyTarget, Index, ReferentialAction, TableDefinition,
};
pub use seed::{SeedLocals, SeedPlan, Value};
pub use verify::{TestOutcome, VerificationTest};
