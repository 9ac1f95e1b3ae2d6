//! Datastore trait: the seam between the engine and a concrete backend

use async_trait::async_trait;

use seedline_core::{ForeignKey, SeedPlan, TableDefinition};

/// Per-table result of a committed seed application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedOutcome {
    /// Rows written by this application
    pub inserted: u64,

    /// Rows left unchanged because a row with the same primary key already
    /// existed
    pub skipped: u64,
}

/// Errors surfaced by datastore operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// A seed row references a parent row that does not exist at execution
    /// time; the table's transaction has been rolled back
    #[error(
        "dangling reference: {table}.{column} = '{value}' has no matching row in `{referenced}`"
    )]
    DanglingReference {
        table: String,
        column: String,
        value: String,
        referenced: String,
    },

    /// The targeted table is not present in the datastore
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Backend-level failure (statement, connection, constraint)
    #[error("query failed: {0}")]
    Query(String),
}

/// A handle to the target datastore
///
/// Discipline: one transaction per table-seed-unit, no nested or cross-unit
/// transactions. Verification methods are read-only and safe to run
/// concurrently.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Backend name, for logs and the report
    fn name(&self) -> &'static str;

    /// Create the table (and its indexes) if it is not already present
    async fn ensure_table(&self, table: &TableDefinition) -> Result<(), StoreError>;

    /// Apply a seed plan inside a single transaction: either every row is
    /// written or skipped, or none are. Row identity is the declared primary
    /// key; existing rows are left unchanged.
    async fn apply_seed(
        &self,
        table: &TableDefinition,
        plan: &SeedPlan,
    ) -> Result<SeedOutcome, StoreError>;

    /// Whether the table is present
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Number of rows currently in the table
    async fn count_rows(&self, table: &str) -> Result<u64, StoreError>;

    /// Number of columns in the applied table
    async fn count_columns(&self, table: &str) -> Result<usize, StoreError>;

    /// Number of rows whose foreign-key value has no matching row in the
    /// referenced table (NULL values are not dangling)
    async fn count_dangling(
        &self,
        table: &TableDefinition,
        fk: &ForeignKey,
    ) -> Result<u64, StoreError>;
}
