//! Raw declaration file structure
//!
//! A declaration file is a TOML document holding an optional `[table]`
//! block, an optional `[seed]` block, and zero or more `[[verify]]` blocks.
//! These structs are the serialization layer only; conversion and validation
//! into the core model happen in the loader.

use serde::Deserialize;

use seedline_core::{Column, ForeignKey, Index, SeedLocals, Value, VerificationTest};

/// One declaration file, as deserialized
#[derive(Debug, Clone, Deserialize)]
pub struct DeclFile {
    /// Table schema declaration
    #[serde(default)]
    pub table: Option<TableDecl>,

    /// Seed plan declaration
    #[serde(default)]
    pub seed: Option<SeedDecl>,

    /// Co-located verification tests
    #[serde(default)]
    pub verify: Vec<VerificationTest>,
}

/// `[table]` block
#[derive(Debug, Clone, Deserialize)]
pub struct TableDecl {
    /// Table name
    pub name: String,

    /// Ordered columns
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Primary key column set
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Named indexes
    #[serde(default)]
    pub indexes: Vec<Index>,

    /// Foreign keys
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

/// `[seed]` block
///
/// A seed declares its rows either structurally (`columns` + `rows`) or as
/// an embedded raw INSERT statement (`sql`), never both.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedDecl {
    /// Target table name
    pub table: String,

    /// Ordered column list for structured rows
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    /// Structured row tuples
    #[serde(default)]
    pub rows: Option<Vec<Vec<Value>>>,

    /// Embedded raw INSERT statement text, decoded at load time
    #[serde(default)]
    pub sql: Option<String>,

    /// Companion metadata ("locals")
    #[serde(default)]
    pub locals: SeedLocals,
}
