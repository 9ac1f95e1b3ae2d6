//! Seed plans: fixture rows bound for a target table

use serde::{Deserialize, Serialize};

/// A scalar cell value in a seed row
///
/// Decoded from structured declaration rows or from literals inside an
/// embedded INSERT statement. Always bound to the datastore as a native
/// parameter, never spliced into statement text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL (only expressible through raw statement text or defaults)
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Whether this cell is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Validated companion metadata declared alongside a seed
///
/// Replaces the loosely-typed "locals" blocks of the declaration sources: a
/// declared row count becomes an executable row-count verification test
/// rather than a comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedLocals {
    /// Declared number of rows the seed is expected to produce
    #[serde(default)]
    pub row_count: Option<u64>,

    /// Declared column list, cross-checked against the effective one
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

/// Fixture rows to be loaded into one table
///
/// Row tuples are positionally matched to `columns`. Plans are created once
/// at load time and are immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPlan {
    /// Target table name
    pub table: String,

    /// Ordered column list the row tuples are matched against
    pub columns: Vec<String>,

    /// Ordered row tuples
    pub rows: Vec<Vec<Value>>,

    /// Raw statement text the rows were decoded from, when the seed was
    /// authored as an embedded INSERT rather than structured tuples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_statement: Option<String>,

    /// Declared companion metadata
    #[serde(default)]
    pub locals: SeedLocals,
}

impl SeedPlan {
    /// Position of a column within the plan's column list
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of row tuples in the plan
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}
