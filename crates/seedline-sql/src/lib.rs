//! Seedline SQL
//!
//! Decodes embedded raw INSERT statement text into structured seed rows.
//! Raw-SQL seed files are a serialization format, not passthrough statements:
//! the engine needs individual values for dependency checking and
//! idempotency, so the text is parsed into `(columns, rows)` at load time.

pub mod insert;

pub use insert::{decode_seed_statements, DecodedSeed, SeedDecodeError};
