//! Declaration directory loading and local validation
//!
//! The loader is purely functional parse-and-validate: it reads every
//! `.toml` file under the declaration directory and performs per-table
//! structural checks only. Cross-table reference resolution is deferred to
//! the graph builder, since a table may legitimately reference a table
//! declared later in the input order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use seedline_core::{SeedPlan, TableDefinition, Value, VerificationTest};
use seedline_sql::{decode_seed_statements, SeedDecodeError};

use crate::file::{DeclFile, SeedDecl, TableDecl};

/// Everything loaded from a declaration directory
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct DeclarationSet {
    /// Table definitions by name
    pub tables: BTreeMap<String, TableDefinition>,

    /// Seed plans by target table (at most one per table)
    pub seeds: BTreeMap<String, SeedPlan>,

    /// All verification tests, declared and implicit
    pub tests: Vec<VerificationTest>,
}

impl DeclarationSet {
    /// The seed plan for a table, if one was declared
    pub fn seed_for(&self, table: &str) -> Option<&SeedPlan> {
        self.seeds.get(table)
    }
}

/// Load-time errors; all are fatal for the run
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {file}: {message}")]
    Io { file: PathBuf, message: String },

    #[error("failed to parse {file}: {message}")]
    Parse { file: PathBuf, message: String },

    #[error("invalid declaration in {file}: table `{table}`: {rule}")]
    SchemaValidation {
        file: PathBuf,
        table: String,
        rule: String,
    },

    #[error("failed to decode seed for `{table}` in {file}: {source}")]
    SeedDecode {
        file: PathBuf,
        table: String,
        source: SeedDecodeError,
    },
}

impl LoadError {
    fn validation(file: &Path, table: &str, rule: impl Into<String>) -> Self {
        Self::SchemaValidation {
            file: file.to_path_buf(),
            table: table.to_string(),
            rule: rule.into(),
        }
    }
}

/// Load and validate every declaration file under `dir`
///
/// Files are visited in path order so errors and implicit tests are
/// deterministic.
pub fn load_dir(dir: &Path) -> Result<DeclarationSet, LoadError> {
    let mut set = DeclarationSet::default();
    let mut table_origin: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut seed_origin: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut pending_tests: Vec<(PathBuf, VerificationTest)> = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| LoadError::Io {
            file: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }

        debug!(file = %path.display(), "loading declaration file");
        let contents = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let decl: DeclFile = toml::from_str(&contents).map_err(|e| LoadError::Parse {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(table) = decl.table {
            let definition = validate_table(path, table)?;
            if let Some(first) = table_origin.get(&definition.name) {
                return Err(LoadError::validation(
                    path,
                    &definition.name,
                    format!("duplicate table name (first declared in {})", first.display()),
                ));
            }
            table_origin.insert(definition.name.clone(), path.to_path_buf());
            set.tables.insert(definition.name.clone(), definition);
        }

        if let Some(seed) = decl.seed {
            let plan = build_seed_plan(path, seed)?;
            if let Some(first) = seed_origin.get(&plan.table) {
                return Err(LoadError::validation(
                    path,
                    &plan.table,
                    format!(
                        "duplicate seed plan (first declared in {})",
                        first.display()
                    ),
                ));
            }
            seed_origin.insert(plan.table.clone(), path.to_path_buf());
            set.seeds.insert(plan.table.clone(), plan);
        }

        for test in decl.verify {
            pending_tests.push((path.to_path_buf(), test));
        }
    }

    resolve_targets(&mut set, &seed_origin, pending_tests)?;
    Ok(set)
}

/// Per-table structural validation; cross-table checks are the graph
/// builder's job
fn validate_table(file: &Path, decl: TableDecl) -> Result<TableDefinition, LoadError> {
    let name = decl.name;
    if !is_identifier(&name) {
        return Err(LoadError::validation(file, &name, "invalid table name"));
    }
    if decl.columns.is_empty() {
        return Err(LoadError::validation(file, &name, "table has no columns"));
    }

    for (i, column) in decl.columns.iter().enumerate() {
        if !is_identifier(&column.name) {
            return Err(LoadError::validation(
                file,
                &name,
                format!("invalid column name `{}`", column.name),
            ));
        }
        if decl.columns[..i].iter().any(|c| c.name == column.name) {
            return Err(LoadError::validation(
                file,
                &name,
                format!("duplicate column name `{}`", column.name),
            ));
        }
    }

    if decl.primary_key.is_empty() {
        return Err(LoadError::validation(
            file,
            &name,
            "table declares no primary key",
        ));
    }
    for pk in &decl.primary_key {
        match decl.columns.iter().find(|c| &c.name == pk) {
            None => {
                return Err(LoadError::validation(
                    file,
                    &name,
                    format!("primary key names unknown column `{}`", pk),
                ));
            }
            Some(column) if column.nullable => {
                return Err(LoadError::validation(
                    file,
                    &name,
                    format!("primary key column `{}` must be declared non-null", pk),
                ));
            }
            Some(_) => {}
        }
    }

    for index in &decl.indexes {
        if !is_identifier(&index.name) {
            return Err(LoadError::validation(
                file,
                &name,
                format!("invalid index name `{}`", index.name),
            ));
        }
        for col in &index.columns {
            if !decl.columns.iter().any(|c| &c.name == col) {
                return Err(LoadError::validation(
                    file,
                    &name,
                    format!("index `{}` names unknown column `{}`", index.name, col),
                ));
            }
        }
    }

    for fk in &decl.foreign_keys {
        if fk.columns.is_empty() {
            return Err(LoadError::validation(
                file,
                &name,
                "foreign key declares no columns",
            ));
        }
        if fk.columns.len() != fk.references.columns.len() {
            return Err(LoadError::validation(
                file,
                &name,
                format!(
                    "foreign key to `{}` has {} local columns but {} referenced",
                    fk.references.table,
                    fk.columns.len(),
                    fk.references.columns.len()
                ),
            ));
        }
        for col in &fk.columns {
            if !decl.columns.iter().any(|c| &c.name == col) {
                return Err(LoadError::validation(
                    file,
                    &name,
                    format!("foreign key names unknown local column `{}`", col),
                ));
            }
        }
    }

    Ok(TableDefinition {
        name,
        columns: decl.columns,
        primary_key: decl.primary_key,
        indexes: decl.indexes,
        foreign_keys: decl.foreign_keys,
    })
}

/// Convert a seed declaration into a structured plan, decoding embedded SQL
/// when present
fn build_seed_plan(file: &Path, decl: SeedDecl) -> Result<SeedPlan, LoadError> {
    let table = decl.table;

    let (columns, rows, raw_statement) = match (decl.sql, decl.rows) {
        (Some(_), Some(_)) => {
            return Err(LoadError::validation(
                file,
                &table,
                "seed declares both structured rows and embedded sql",
            ));
        }
        (Some(sql), None) => {
            let decoded =
                decode_seed_statements(&sql).map_err(|source| LoadError::SeedDecode {
                    file: file.to_path_buf(),
                    table: table.clone(),
                    source,
                })?;
            if decoded.table != table {
                return Err(LoadError::validation(
                    file,
                    &table,
                    format!("embedded sql inserts into `{}`", decoded.table),
                ));
            }
            if let Some(declared) = &decl.columns {
                if declared != &decoded.columns {
                    return Err(LoadError::validation(
                        file,
                        &table,
                        "declared column list disagrees with embedded sql",
                    ));
                }
            }
            (decoded.columns, decoded.rows, Some(sql))
        }
        (None, Some(rows)) => {
            let columns = decl.columns.ok_or_else(|| {
                LoadError::validation(file, &table, "structured rows require a column list")
            })?;
            for (i, row) in rows.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(LoadError::validation(
                        file,
                        &table,
                        format!(
                            "row {} has {} values, column list has {}",
                            i + 1,
                            row.len(),
                            columns.len()
                        ),
                    ));
                }
            }
            (columns, rows, None)
        }
        (None, None) => {
            return Err(LoadError::validation(
                file,
                &table,
                "seed declares neither rows nor sql",
            ));
        }
    };

    if let Some(declared) = &decl.locals.columns {
        if declared != &columns {
            return Err(LoadError::validation(
                file,
                &table,
                "locals column list disagrees with the effective one",
            ));
        }
    }

    Ok(SeedPlan {
        table,
        columns,
        rows,
        raw_statement,
        locals: decl.locals,
    })
}

/// Whole-set target resolution: seeds and tests must name declared tables,
/// seeds must carry usable primary keys, and declared row counts become
/// implicit row-count tests
fn resolve_targets(
    set: &mut DeclarationSet,
    seed_origin: &BTreeMap<String, PathBuf>,
    pending_tests: Vec<(PathBuf, VerificationTest)>,
) -> Result<(), LoadError> {
    for (table, plan) in &set.seeds {
        let file = &seed_origin[table];
        let definition = set.tables.get(table).ok_or_else(|| {
            LoadError::validation(file, table, "seed targets an undeclared table")
        })?;

        for col in &plan.columns {
            if definition.find_column(col).is_none() {
                return Err(LoadError::validation(
                    file,
                    table,
                    format!("seed names unknown column `{}`", col),
                ));
            }
        }

        let pk_positions: Vec<usize> = definition
            .primary_key
            .iter()
            .map(|pk| {
                plan.column_index(pk).ok_or_else(|| {
                    LoadError::validation(
                        file,
                        table,
                        format!("seed omits primary key column `{}`", pk),
                    )
                })
            })
            .collect::<Result<_, _>>()?;

        for (i, row) in plan.rows.iter().enumerate() {
            if pk_positions.iter().any(|&p| matches!(row[p], Value::Null)) {
                return Err(LoadError::validation(
                    file,
                    table,
                    format!("row {} has a NULL primary key value", i + 1),
                ));
            }
        }
    }

    for (file, test) in &pending_tests {
        if !set.tables.contains_key(test.table()) {
            return Err(LoadError::validation(
                file,
                test.table(),
                format!("{} test targets an undeclared table", test.kind()),
            ));
        }
    }
    set.tests = pending_tests.into_iter().map(|(_, test)| test).collect();

    // Declared row counts are not trusted; they become executable assertions.
    for (table, plan) in &set.seeds {
        if let Some(expected) = plan.locals.row_count {
            set.tests.push(VerificationTest::RowCount {
                table: table.clone(),
                expected,
            });
        }
    }

    Ok(())
}

/// Bare identifier check; declaration names feed into generated DDL, so the
/// grammar is deliberately narrow
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
