//! Verification tests: declarative post-seed assertions
//!
//! Test kind tags are stable and part of the declaration format. Do not
//! rename them; add new kinds with new tags only.

use serde::{Deserialize, Serialize};

/// A declared post-condition assertion over a seeded table
///
/// Each kind carries only the fields it needs and is evaluated by a single
/// dispatcher. Tests are independent of one another but run only after the
/// seeding work for their target table has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum VerificationTest {
    /// The table is present in the datastore
    SchemaExists { table: String },

    /// The applied table has exactly the expected number of columns
    /// (drift detector between declaration and applied schema)
    ColumnCount { table: String, expected: usize },

    /// The table holds exactly the expected number of rows
    RowCount { table: String, expected: u64 },

    /// No row has a foreign-key value absent from the referenced table.
    /// When `column` is set, only the foreign key starting with that local
    /// column is checked; otherwise every declared key is.
    ReferentialCheck {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<String>,
    },
}

impl VerificationTest {
    /// The table this assertion targets
    pub fn table(&self) -> &str {
        match self {
            Self::SchemaExists { table }
            | Self::ColumnCount { table, .. }
            | Self::RowCount { table, .. }
            | Self::ReferentialCheck { table, .. } => table,
        }
    }

    /// Stable kind tag, as written in declaration files
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaExists { .. } => "schema-exists",
            Self::ColumnCount { .. } => "column-count",
            Self::RowCount { .. } => "row-count",
            Self::ReferentialCheck { .. } => "referential-check",
        }
    }
}

impl std::fmt::Display for VerificationTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.kind(), self.table())
    }
}

/// Result of evaluating one verification test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum TestOutcome {
    /// The assertion held
    Pass,

    /// The assertion did not hold; both sides are recorded
    Fail { expected: String, observed: String },

    /// The assertion could not be evaluated (its table was never
    /// successfully seeded, or the query itself failed)
    Error { reason: String },
}

impl TestOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_tags_are_stable() {
        let test = VerificationTest::RowCount {
            table: "users".to_string(),
            expected: 1,
        };
        assert_eq!(test.kind(), "row-count");
        assert_eq!(test.table(), "users");
        assert_eq!(test.to_string(), "row-count on users");
    }

    #[test]
    fn tests_deserialize_from_toml() {
        let test: VerificationTest = toml::from_str(
            r#"
            kind = "row-count"
            table = "employers"
            expected = 8
            "#,
        )
        .unwrap();
        assert_eq!(
            test,
            VerificationTest::RowCount {
                table: "employers".to_string(),
                expected: 8
            }
        );

        let test: VerificationTest = toml::from_str(
            r#"
            kind = "referential-check"
            table = "employers"
            "#,
        )
        .unwrap();
        assert_eq!(
            test,
            VerificationTest::ReferentialCheck {
                table: "employers".to_string(),
                column: None
            }
        );
    }

    #[test]
    fn outcome_predicates() {
        assert!(TestOutcome::Pass.is_pass());
        assert!(TestOutcome::Fail {
            expected: "8".into(),
            observed: "7".into()
        }
        .is_fail());
        assert!(TestOutcome::Error {
            reason: "table was never seeded".into()
        }
        .is_error());
    }

    #[test]
    fn outcome_serialization() {
        let outcome = TestOutcome::Fail {
            expected: "8".to_string(),
            observed: "7".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"result\":\"fail\""));
        assert!(json.contains("\"observed\":\"7\""));
    }
}
