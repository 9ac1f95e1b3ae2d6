//! In-memory datastore
//!
//! Implements the full adapter contract (transactional seed application,
//! skip-on-conflict, reference checks) against process-local state. Used by
//! engine tests and `memory` store configs where no database file is wanted.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use seedline_core::{ForeignKey, SeedPlan, TableDefinition, Value};

use crate::adapter::{Datastore, SeedOutcome, StoreError};

#[derive(Debug, Clone)]
struct MemTable {
    definition: TableDefinition,
    /// Rows aligned to `definition.columns` order
    rows: Vec<Vec<Value>>,
}

impl MemTable {
    fn column_position(&self, name: &str) -> Option<usize> {
        self.definition.columns.iter().position(|c| c.name == name)
    }

    /// Project the named columns out of every stored row
    fn key_of(&self, row: &[Value], columns: &[String]) -> Option<Vec<Value>> {
        columns
            .iter()
            .map(|c| self.column_position(c).map(|p| row[p].clone()))
            .collect()
    }
}

/// Process-local datastore with shared state across clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<BTreeMap<String, MemTable>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a table's rows, for assertions in tests
    pub async fn rows_of(&self, table: &str) -> Option<Vec<Vec<Value>>> {
        self.tables.read().await.get(table).map(|t| t.rows.clone())
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_table(&self, table: &TableDefinition) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.entry(table.name.clone()).or_insert_with(|| MemTable {
            definition: table.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn apply_seed(
        &self,
        table: &TableDefinition,
        plan: &SeedPlan,
    ) -> Result<SeedOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.contains_key(&table.name) {
            return Err(StoreError::TableNotFound(table.name.clone()));
        }

        // Stage everything first; state is only touched once the whole plan
        // has been checked, which is what makes the unit atomic.
        let mut staged: Vec<Vec<Value>> = Vec::new();
        let mut outcome = SeedOutcome::default();

        let target = &tables[&table.name];
        let pk_columns = table.primary_key.clone();

        for row in &plan.rows {
            let full = align_row(target, plan, row)?;
            let pk = target
                .key_of(&full, &pk_columns)
                .ok_or_else(|| StoreError::Query("primary key column missing".to_string()))?;

            let already = target
                .rows
                .iter()
                .chain(staged.iter())
                .any(|existing| target.key_of(existing, &pk_columns).as_ref() == Some(&pk));
            if already {
                outcome.skipped += 1;
                continue;
            }

            check_references(&tables, table, &staged, &full)?;
            staged.push(full);
            outcome.inserted += 1;
        }

        if let Some(target) = tables.get_mut(&table.name) {
            target.rows.extend(staged);
        }
        Ok(outcome)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn count_columns(&self, table: &str) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|t| t.definition.columns.len())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn count_dangling(
        &self,
        table: &TableDefinition,
        fk: &ForeignKey,
    ) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        let child = tables
            .get(&table.name)
            .ok_or_else(|| StoreError::TableNotFound(table.name.clone()))?;
        let parent = tables
            .get(&fk.references.table)
            .ok_or_else(|| StoreError::TableNotFound(fk.references.table.clone()))?;

        let mut dangling = 0;
        for row in &child.rows {
            let Some(key) = child.key_of(row, &fk.columns) else {
                continue;
            };
            if key.iter().any(Value::is_null) {
                continue;
            }
            let found = parent.rows.iter().any(|parent_row| {
                parent.key_of(parent_row, &fk.references.columns).as_ref() == Some(&key)
            });
            if !found {
                dangling += 1;
            }
        }
        Ok(dangling)
    }
}

/// Expand a seed row to the table's full column order, applying declared
/// defaults and NULL for omitted columns
fn align_row(
    target: &MemTable,
    plan: &SeedPlan,
    row: &[Value],
) -> Result<Vec<Value>, StoreError> {
    target
        .definition
        .columns
        .iter()
        .map(|column| match plan.column_index(&column.name) {
            Some(i) => Ok(row[i].clone()),
            None => Ok(column.default.clone().unwrap_or(Value::Null)),
        })
        .collect()
}

/// Check one staged row's foreign keys against current state plus the rows
/// staged so far (self-references see earlier rows of the same plan)
fn check_references(
    tables: &BTreeMap<String, MemTable>,
    table: &TableDefinition,
    staged: &[Vec<Value>],
    full: &[Value],
) -> Result<(), StoreError> {
    let child = &tables[&table.name];
    for fk in &table.foreign_keys {
        let Some(key) = child.key_of(full, &fk.columns) else {
            continue;
        };
        if key.iter().any(Value::is_null) {
            continue;
        }

        let parent = tables
            .get(&fk.references.table)
            .ok_or_else(|| StoreError::TableNotFound(fk.references.table.clone()))?;
        let mut candidates: Vec<&Vec<Value>> = parent.rows.iter().collect();
        let self_referencing = fk.references.table == table.name;
        if self_referencing {
            candidates.extend(staged.iter());
        }

        let found = candidates.iter().any(|parent_row| {
            parent.key_of(parent_row, &fk.references.columns).as_ref() == Some(&key)
        });
        if !found {
            return Err(StoreError::DanglingReference {
                table: table.name.clone(),
                column: fk.columns.join(", "),
                value: key
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                referenced: fk.references.table.clone(),
            });
        }
    }
    Ok(())
}
