//! Table definitions and the portable column type system

use serde::{Deserialize, Serialize};

use crate::seed::Value;

/// Portable semantic column type
///
/// Declaration files use these names; each datastore maps them to its own
/// storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UUID, stored as its canonical text form
    Uuid,

    /// Integer type (any precision)
    Int,

    /// Floating point (any precision)
    Float,

    /// Boolean type
    Bool,

    /// String/text type
    Text,

    /// Date (no time component)
    Date,

    /// Timestamp (with time component)
    Timestamp,

    /// JSON document, stored as text
    Json,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uuid => write!(f, "UUID"),
            Self::Int => write!(f, "INT"),
            Self::Float => write!(f, "FLOAT"),
            Self::Bool => write!(f, "BOOL"),
            Self::Text => write!(f, "TEXT"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
        }
    }
}

/// A column in a table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Semantic type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether NULL values are permitted
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Default literal applied when a seed row omits the column
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Create a nullable column with no default
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set the default literal
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A named index over one or more columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Index name
    pub name: String,

    /// Indexed columns, in order
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness
    #[serde(default)]
    pub unique: bool,
}

/// Cascade policy for a foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl Default for ReferentialAction {
    fn default() -> Self {
        Self::NoAction
    }
}

impl std::fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAction => write!(f, "NO ACTION"),
            Self::Restrict => write!(f, "RESTRICT"),
            Self::Cascade => write!(f, "CASCADE"),
            Self::SetNull => write!(f, "SET NULL"),
        }
    }
}

/// The referenced side of a foreign key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyTarget {
    /// Referenced table name
    pub table: String,

    /// Referenced columns, positionally matched to the local columns
    pub columns: Vec<String>,
}

/// A foreign key from local columns to a referenced table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local columns, in order
    pub columns: Vec<String>,

    /// Referenced table and columns
    pub references: ForeignKeyTarget,

    /// Cascade policy on delete
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

impl ForeignKey {
    /// Whether this key references its own table
    pub fn is_self_referencing(&self, table: &str) -> bool {
        self.references.table == table
    }
}

/// A table declaration: ordered columns, primary key, indexes, foreign keys
///
/// Definitions are created once at load time and are immutable for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name
    pub name: String,

    /// Ordered list of columns
    pub columns: Vec<Column>,

    /// Primary key column set
    pub primary_key: Vec<String>,

    /// Named indexes
    #[serde(default)]
    pub indexes: Vec<Index>,

    /// Foreign keys to other tables (or to this table itself)
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDefinition {
    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether a column is part of the primary key
    pub fn is_primary_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|c| c == name)
    }

    /// Tables this definition references through foreign keys, excluding
    /// self-references
    pub fn referenced_tables(&self) -> Vec<&str> {
        self.foreign_keys
            .iter()
            .filter(|fk| !fk.is_self_referencing(&self.name))
            .map(|fk| fk.references.table.as_str())
            .collect()
    }

    /// Whether the referenced columns name this table's primary key or a
    /// declared unique index
    pub fn is_identity_column_set(&self, columns: &[String]) -> bool {
        if column_sets_match(&self.primary_key, columns) {
            return true;
        }
        self.indexes
            .iter()
            .any(|ix| ix.unique && column_sets_match(&ix.columns, columns))
    }
}

fn column_sets_match(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|c| b.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn users_table() -> TableDefinition {
        TableDefinition {
            name: "users".to_string(),
            columns: vec![
                Column::new("id", ColumnType::Uuid).with_nullable(false),
                Column::new("email", ColumnType::Text).with_nullable(false),
                Column::new("manager_id", ColumnType::Uuid),
            ],
            primary_key: vec!["id".to_string()],
            indexes: vec![Index {
                name: "users_email_key".to_string(),
                columns: vec!["email".to_string()],
                unique: true,
            }],
            foreign_keys: vec![ForeignKey {
                columns: vec!["manager_id".to_string()],
                references: ForeignKeyTarget {
                    table: "users".to_string(),
                    columns: vec!["id".to_string()],
                },
                on_delete: ReferentialAction::SetNull,
            }],
        }
    }

    #[test]
    fn column_type_display() {
        assert_eq!(ColumnType::Uuid.to_string(), "UUID");
        assert_eq!(ColumnType::Timestamp.to_string(), "TIMESTAMP");
    }

    #[test]
    fn table_lookups() {
        let table = users_table();
        assert!(table.find_column("email").is_some());
        assert!(table.find_column("nonexistent").is_none());
        assert_eq!(table.column_names(), vec!["id", "email", "manager_id"]);
        assert!(table.is_primary_key_column("id"));
        assert!(!table.is_primary_key_column("email"));
    }

    #[test]
    fn self_reference_excluded_from_referenced_tables() {
        let table = users_table();
        assert!(table.referenced_tables().is_empty());
        assert!(table.foreign_keys[0].is_self_referencing("users"));
    }

    #[test]
    fn identity_column_sets() {
        let table = users_table();
        assert!(table.is_identity_column_set(&["id".to_string()]));
        assert!(table.is_identity_column_set(&["email".to_string()]));
        assert!(!table.is_identity_column_set(&["manager_id".to_string()]));
    }

    #[test]
    fn column_decl_deserialization() {
        let column: Column = toml::from_str(
            r#"
            name = "id"
            type = "uuid"
            nullable = false
            "#,
        )
        .unwrap();

        assert_eq!(column.column_type, ColumnType::Uuid);
        assert!(!column.nullable);

        let column: Column = toml::from_str(
            r#"
            name = "bio"
            type = "text"
            "#,
        )
        .unwrap();
        assert!(column.nullable);
    }
}
