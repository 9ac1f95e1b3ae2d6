//! Embedded SQLite datastore
//!
//! Write access goes through a single connection behind a mutex; each table
//! seed holds the connection for exactly one transaction. Reference checks
//! run inside that transaction, so rows inserted earlier in the same plan
//! are visible to later rows (self-referencing tables seed parent-first).

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::debug;

use seedline_core::{ColumnType, ForeignKey, SeedPlan, TableDefinition, Value};

use crate::adapter::{Datastore, SeedOutcome, StoreError};

/// SQLite-backed datastore
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn)
    }

    /// Open read-only; used by `verify` against an existing database
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(sql_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql_err)?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
            .map_err(sql_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Query("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Query(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl Datastore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_table(&self, table: &TableDefinition) -> Result<(), StoreError> {
        let table = table.clone();
        self.with_conn(move |conn| {
            let ddl = create_table_sql(&table);
            debug!(table = %table.name, "applying schema");
            conn.execute_batch(&ddl).map_err(sql_err)?;
            for index in &table.indexes {
                conn.execute_batch(&create_index_sql(&table.name, index))
                    .map_err(sql_err)?;
            }
            Ok(())
        })
        .await
    }

    async fn apply_seed(
        &self,
        table: &TableDefinition,
        plan: &SeedPlan,
    ) -> Result<SeedOutcome, StoreError> {
        let table = table.clone();
        let plan = plan.clone();
        self.with_conn(move |conn| apply_seed_tx(conn, &table, &plan)).await
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [&table],
                |row| row.get(0),
            )
            .map_err(sql_err)
        })
        .await
    }

    async fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        let name = table.to_string();
        if !self.table_exists(table).await? {
            return Err(StoreError::TableNotFound(name));
        }
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
                    [],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            Ok(count as u64)
        })
        .await
    }

    async fn count_columns(&self, table: &str) -> Result<usize, StoreError> {
        let name = table.to_string();
        if !self.table_exists(table).await? {
            return Err(StoreError::TableNotFound(name));
        }
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM pragma_table_info(?1)",
                    [&name],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            Ok(count as usize)
        })
        .await
    }

    async fn count_dangling(
        &self,
        table: &TableDefinition,
        fk: &ForeignKey,
    ) -> Result<u64, StoreError> {
        if !self.table_exists(&table.name).await? {
            return Err(StoreError::TableNotFound(table.name.clone()));
        }
        let sql = count_dangling_sql(&table.name, fk);
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0)).map_err(sql_err)?;
            Ok(count as u64)
        })
        .await
    }
}

/// One table seed, one transaction
fn apply_seed_tx(
    conn: &mut Connection,
    table: &TableDefinition,
    plan: &SeedPlan,
) -> Result<SeedOutcome, StoreError> {
    let pk_positions: Vec<usize> = table
        .primary_key
        .iter()
        .map(|pk| {
            plan.column_index(pk).ok_or_else(|| {
                StoreError::Query(format!("seed for `{}` omits primary key `{}`", plan.table, pk))
            })
        })
        .collect::<Result<_, _>>()?;

    let exists_sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
        quote_ident(&table.name),
        predicate(&table.primary_key)
    );
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.name),
        plan.columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        (1..=plan.columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let tx = conn.transaction().map_err(sql_err)?;
    let mut outcome = SeedOutcome::default();
    {
        let mut exists_stmt = tx.prepare(&exists_sql).map_err(sql_err)?;
        let mut insert_stmt = tx.prepare(&insert_sql).map_err(sql_err)?;

        for row in &plan.rows {
            let pk_params: Vec<rusqlite::types::Value> =
                pk_positions.iter().map(|&p| sql_value(&row[p])).collect();
            let exists: bool = exists_stmt
                .query_row(params_from_iter(pk_params), |r| r.get(0))
                .map_err(sql_err)?;
            if exists {
                outcome.skipped += 1;
                continue;
            }

            check_references(&tx, table, plan, row)?;

            let params: Vec<rusqlite::types::Value> = row.iter().map(sql_value).collect();
            insert_stmt
                .execute(params_from_iter(params))
                .map_err(sql_err)?;
            outcome.inserted += 1;
        }
    }
    // Dropping the transaction without committing rolls the table back.
    tx.commit().map_err(sql_err)?;
    Ok(outcome)
}

/// Verify every foreign-key value of one row against its referenced table,
/// inside the open transaction
fn check_references(
    tx: &rusqlite::Transaction<'_>,
    table: &TableDefinition,
    plan: &SeedPlan,
    row: &[Value],
) -> Result<(), StoreError> {
    for fk in &table.foreign_keys {
        let mut values: Vec<&Value> = Vec::with_capacity(fk.columns.len());
        let mut checkable = true;
        for col in &fk.columns {
            match plan.column_index(col) {
                Some(i) if !row[i].is_null() => values.push(&row[i]),
                // A NULL or omitted key column means no reference to check.
                _ => {
                    checkable = false;
                    break;
                }
            }
        }
        if !checkable {
            continue;
        }

        let check_sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
            quote_ident(&fk.references.table),
            predicate(&fk.references.columns)
        );
        let params: Vec<rusqlite::types::Value> =
            values.iter().map(|v| sql_value(v)).collect();
        let found: bool = tx
            .query_row(&check_sql, params_from_iter(params), |r| r.get(0))
            .map_err(sql_err)?;
        if !found {
            return Err(StoreError::DanglingReference {
                table: table.name.clone(),
                column: fk.columns.join(", "),
                value: values
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

fn predicate(columns: &[String]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn create_table_sql(table: &TableDefinition) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut part = format!(
                "{} {}",
                quote_ident(&column.name),
                storage_class(column.column_type)
            );
            if !column.nullable {
                part.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                part.push_str(&format!(" DEFAULT {}", render_literal(default)));
            }
            part
        })
        .collect();

    parts.push(format!(
        "PRIMARY KEY ({})",
        table
            .primary_key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    for fk in &table.foreign_keys {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            fk.columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(&fk.references.table),
            fk.references
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            fk.on_delete
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote_ident(&table.name),
        parts.join(", ")
    )
}

fn create_index_sql(table: &str, index: &seedline_core::Index) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table),
        index
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn count_dangling_sql(table: &str, fk: &ForeignKey) -> String {
    let not_null = fk
        .columns
        .iter()
        .map(|c| format!("c.{} IS NOT NULL", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let join = fk
        .columns
        .iter()
        .zip(&fk.references.columns)
        .map(|(local, referenced)| {
            format!("p.{} = c.{}", quote_ident(referenced), quote_ident(local))
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT COUNT(*) FROM {} c WHERE {} AND NOT EXISTS (SELECT 1 FROM {} p WHERE {})",
        quote_ident(table),
        not_null,
        quote_ident(&fk.references.table),
        join
    )
}

/// Map the portable column types onto SQLite storage classes
fn storage_class(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Int | ColumnType::Bool => "INTEGER",
        ColumnType::Float => "REAL",
        ColumnType::Uuid
        | ColumnType::Text
        | ColumnType::Date
        | ColumnType::Timestamp
        | ColumnType::Json => "TEXT",
    }
}

fn sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(x) => rusqlite::types::Value::Real(*x),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

/// Render a literal for DDL DEFAULT clauses
fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use seedline_core::{Column, ForeignKeyTarget, Index, ReferentialAction, SeedLocals};

    fn users() -> TableDefinition {
        TableDefinition {
            name: "users".to_string(),
            columns: vec![
                Column::new("id", ColumnType::Uuid).with_nullable(false),
                Column::new("email", ColumnType::Text).with_nullable(false),
            ],
            primary_key: vec!["id".to_string()],
            indexes: vec![Index {
                name: "users_email_key".to_string(),
                columns: vec!["email".to_string()],
                unique: true,
            }],
            foreign_keys: vec![],
        }
    }

    fn employers() -> TableDefinition {
        TableDefinition {
            name: "employers".to_string(),
            columns: vec![
                Column::new("id", ColumnType::Uuid).with_nullable(false),
                Column::new("user_id", ColumnType::Uuid).with_nullable(false),
            ],
            primary_key: vec!["id".to_string()],
            indexes: vec![],
            foreign_keys: vec![ForeignKey {
                columns: vec!["user_id".to_string()],
                references: ForeignKeyTarget {
                    table: "users".to_string(),
                    columns: vec!["id".to_string()],
                },
                on_delete: ReferentialAction::Cascade,
            }],
        }
    }

    fn plan(table: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> SeedPlan {
        SeedPlan {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            raw_statement: None,
            locals: SeedLocals::default(),
        }
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table(&users()).await.unwrap();
        store.ensure_table(&users()).await.unwrap();
        assert!(store.table_exists("users").await.unwrap());
        assert_eq!(store.count_columns("users").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn apply_seed_twice_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table(&users()).await.unwrap();

        let seed = plan(
            "users",
            &["id", "email"],
            vec![
                vec![text("u1"), text("amy@example.com")],
                vec![text("u2"), text("bob@example.com")],
            ],
        );

        let first = store.apply_seed(&users(), &seed).await.unwrap();
        assert_eq!(first, SeedOutcome { inserted: 2, skipped: 0 });

        let second = store.apply_seed(&users(), &seed).await.unwrap();
        assert_eq!(second, SeedOutcome { inserted: 0, skipped: 2 });

        assert_eq!(store.count_rows("users").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dangling_reference_rolls_back_the_whole_plan() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table(&users()).await.unwrap();
        store.ensure_table(&employers()).await.unwrap();

        let seed = plan(
            "users",
            &["id", "email"],
            vec![vec![text("u1"), text("amy@example.com")]],
        );
        store.apply_seed(&users(), &seed).await.unwrap();

        let bad = plan(
            "employers",
            &["id", "user_id"],
            vec![
                vec![text("e1"), text("u1")],
                vec![text("e2"), text("missing")],
            ],
        );
        let err = store.apply_seed(&employers(), &bad).await.unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { ref referenced, .. }
            if referenced == "users"));

        // Partial application is never permitted: e1 must not survive.
        assert_eq!(store.count_rows("employers").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn self_reference_seeds_parent_first() {
        let table = TableDefinition {
            name: "employees".to_string(),
            columns: vec![
                Column::new("id", ColumnType::Uuid).with_nullable(false),
                Column::new("manager_id", ColumnType::Uuid),
            ],
            primary_key: vec!["id".to_string()],
            indexes: vec![],
            foreign_keys: vec![ForeignKey {
                columns: vec!["manager_id".to_string()],
                references: ForeignKeyTarget {
                    table: "employees".to_string(),
                    columns: vec!["id".to_string()],
                },
                on_delete: ReferentialAction::SetNull,
            }],
        };

        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table(&table).await.unwrap();

        // Parent first: the root has a NULL manager, the report references it.
        let good = plan(
            "employees",
            &["id", "manager_id"],
            vec![
                vec![text("boss"), Value::Null],
                vec![text("worker"), text("boss")],
            ],
        );
        let outcome = store.apply_seed(&table, &good).await.unwrap();
        assert_eq!(outcome.inserted, 2);

        // Child before parent fails at execution time.
        let bad = plan(
            "employees",
            &["id", "manager_id"],
            vec![
                vec![text("early"), text("late")],
                vec![text("late"), Value::Null],
            ],
        );
        let err = store.apply_seed(&table, &bad).await.unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { .. }));
        assert_eq!(store.count_rows("employees").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn count_dangling_spots_orphans() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_table(&users()).await.unwrap();

        // No FK pragma enforcement path here: create the orphan directly.
        let orphan_table = TableDefinition {
            foreign_keys: vec![],
            ..employers()
        };
        store.ensure_table(&orphan_table).await.unwrap();
        let seed = plan(
            "employers",
            &["id", "user_id"],
            vec![vec![text("e1"), text("ghost")]],
        );
        store.apply_seed(&orphan_table, &seed).await.unwrap();

        let fk = employers().foreign_keys[0].clone();
        let dangling = store.count_dangling(&employers(), &fk).await.unwrap();
        assert_eq!(dangling, 1);
    }

    #[tokio::test]
    async fn missing_table_is_reported() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.table_exists("users").await.unwrap());
        assert!(matches!(
            store.count_rows("users").await.unwrap_err(),
            StoreError::TableNotFound(_)
        ));
    }

    #[test]
    fn ddl_shape() {
        let ddl = create_table_sql(&employers());
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS \"employers\""));
        assert!(ddl.contains("\"id\" TEXT NOT NULL"));
        assert!(ddl.contains("PRIMARY KEY (\"id\")"));
        assert!(ddl.contains(
            "FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"
        ));

        let index_ddl = create_index_sql("users", &users().indexes[0]);
        assert_eq!(
            index_ddl,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"users_email_key\" ON \"users\" (\"email\");"
        );
    }
}
