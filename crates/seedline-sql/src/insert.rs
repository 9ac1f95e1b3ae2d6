//! INSERT statement decoding using sqlparser
//!
//! Seed files may embed one or more multi-row INSERT statements as free
//! text. All statements in one seed must target the same table with the same
//! column list; their row tuples are concatenated in statement order.

use sqlparser::ast::{Expr, SetExpr, Statement, UnaryOperator, Value as AstValue};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use seedline_core::Value;

/// Structured form of an embedded seed statement
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSeed {
    /// Target table name (qualifier stripped)
    pub table: String,

    /// Ordered column list
    pub columns: Vec<String>,

    /// Row tuples, positionally matched to `columns`
    pub rows: Vec<Vec<Value>>,
}

/// Errors produced while decoding embedded seed text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeedDecodeError {
    #[error("failed to parse seed statement: {0}")]
    Parse(String),

    #[error("seed text contains no statements")]
    Empty,

    #[error("expected an INSERT statement, found {0}")]
    NotAnInsert(String),

    #[error("INSERT must carry an explicit column list")]
    MissingColumnList,

    #[error("INSERT has no VALUES rows")]
    MissingRows,

    #[error("statements target different tables: {first} vs {second}")]
    MixedTargets { first: String, second: String },

    #[error("statements disagree on column lists for table {table}")]
    MixedColumns { table: String },

    #[error("row {row} has {found} values, column list has {expected}")]
    RowArity {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("unsupported value expression in row {row}: {expr}")]
    UnsupportedExpr { row: usize, expr: String },
}

/// Decode one or more INSERT statements into a single structured seed
pub fn decode_seed_statements(sql: &str) -> Result<DecodedSeed, SeedDecodeError> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| SeedDecodeError::Parse(e.to_string()))?;

    if statements.is_empty() {
        return Err(SeedDecodeError::Empty);
    }

    let mut decoded: Option<DecodedSeed> = None;

    for statement in statements {
        let insert = match statement {
            Statement::Insert(insert) => insert,
            other => return Err(SeedDecodeError::NotAnInsert(statement_kind(&other))),
        };

        let table = insert
            .table_name
            .0
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_default();

        if insert.columns.is_empty() {
            return Err(SeedDecodeError::MissingColumnList);
        }
        let columns: Vec<String> = insert.columns.iter().map(|c| c.value.clone()).collect();

        let source = insert.source.ok_or(SeedDecodeError::MissingRows)?;
        let values = match source.body.as_ref() {
            SetExpr::Values(values) => values,
            _ => return Err(SeedDecodeError::MissingRows),
        };

        if let Some(existing) = &decoded {
            if existing.table != table {
                return Err(SeedDecodeError::MixedTargets {
                    first: existing.table.clone(),
                    second: table,
                });
            }
            if existing.columns != columns {
                return Err(SeedDecodeError::MixedColumns { table });
            }
        }
        let target = decoded.get_or_insert_with(|| DecodedSeed {
            table,
            columns,
            rows: Vec::new(),
        });

        for row in &values.rows {
            let index = target.rows.len() + 1;
            if row.len() != target.columns.len() {
                return Err(SeedDecodeError::RowArity {
                    row: index,
                    found: row.len(),
                    expected: target.columns.len(),
                });
            }
            let tuple = row
                .iter()
                .map(|expr| literal_value(expr, index))
                .collect::<Result<Vec<Value>, _>>()?;
            target.rows.push(tuple);
        }
    }

    let decoded = decoded.ok_or(SeedDecodeError::Empty)?;
    if decoded.rows.is_empty() {
        return Err(SeedDecodeError::MissingRows);
    }
    Ok(decoded)
}

/// Convert a literal value expression into a seed cell
fn literal_value(expr: &Expr, row: usize) -> Result<Value, SeedDecodeError> {
    match expr {
        Expr::Value(value) => ast_value(value, row, expr),
        // Casts like 'a6e1…'::uuid carry the literal inside
        Expr::Cast { expr: inner, .. } => literal_value(inner, row),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match literal_value(inner, row)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(x) => Ok(Value::Float(-x)),
            _ => Err(unsupported(expr, row)),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr: inner,
        } => literal_value(inner, row),
        _ => Err(unsupported(expr, row)),
    }
}

fn ast_value(value: &AstValue, row: usize, expr: &Expr) -> Result<Value, SeedDecodeError> {
    match value {
        AstValue::Null => Ok(Value::Null),
        AstValue::Boolean(b) => Ok(Value::Bool(*b)),
        AstValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Int(i))
            } else if let Ok(x) = n.parse::<f64>() {
                Ok(Value::Float(x))
            } else {
                Err(unsupported(expr, row))
            }
        }
        AstValue::SingleQuotedString(s)
        | AstValue::DoubleQuotedString(s)
        | AstValue::EscapedStringLiteral(s) => Ok(Value::Text(s.clone())),
        _ => Err(unsupported(expr, row)),
    }
}

fn unsupported(expr: &Expr, row: usize) -> SeedDecodeError {
    SeedDecodeError::UnsupportedExpr {
        row,
        expr: expr.to_string(),
    }
}

fn statement_kind(statement: &Statement) -> String {
    match statement {
        Statement::Query(_) => "a query".to_string(),
        Statement::Update { .. } => "an UPDATE".to_string(),
        Statement::Delete(_) => "a DELETE".to_string(),
        Statement::CreateTable(_) => "a CREATE TABLE".to_string(),
        other => {
            let text = other.to_string();
            let head: String = text.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
            format!("`{}`", head)
        }
    }
}
