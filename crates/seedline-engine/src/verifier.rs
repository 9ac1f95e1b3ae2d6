//! Verification runner
//!
//! Evaluates every declared assertion independently against the seeded
//! datastore. A failing test never halts the remaining ones; outcomes are
//! accumulated and the run's final status is derived from the full report.

use std::collections::BTreeSet;

use tracing::debug;

use seedline_core::{TestOutcome, VerificationOutcome, VerificationTest};
use seedline_decl::DeclarationSet;
use seedline_store::{Datastore, StoreError};

/// Evaluate all tests in the set
///
/// `unseeded` names tables whose seed did not complete successfully; their
/// tests report `error` rather than `fail`, to distinguish "assertion did
/// not hold" from "could not be evaluated".
pub async fn run_tests(
    store: &dyn Datastore,
    set: &DeclarationSet,
    unseeded: &BTreeSet<String>,
) -> Vec<VerificationOutcome> {
    let mut outcomes = Vec::with_capacity(set.tests.len());
    for test in &set.tests {
        let outcome = if unseeded.contains(test.table()) {
            TestOutcome::Error {
                reason: format!("table `{}` was not successfully seeded", test.table()),
            }
        } else {
            evaluate(store, set, test).await
        };
        debug!(test = %test, outcome = ?outcome, "verification evaluated");
        outcomes.push(VerificationOutcome {
            test: test.clone(),
            outcome,
        });
    }
    outcomes
}

/// Single dispatcher over the test kinds
async fn evaluate(
    store: &dyn Datastore,
    set: &DeclarationSet,
    test: &VerificationTest,
) -> TestOutcome {
    match test {
        VerificationTest::SchemaExists { table } => match store.table_exists(table).await {
            Ok(true) => TestOutcome::Pass,
            Ok(false) => TestOutcome::Fail {
                expected: "present".to_string(),
                observed: "absent".to_string(),
            },
            Err(e) => error_outcome(e),
        },

        VerificationTest::ColumnCount { table, expected } => {
            match store.count_columns(table).await {
                Ok(observed) => compare(*expected as u64, observed as u64),
                Err(e) => error_outcome(e),
            }
        }

        VerificationTest::RowCount { table, expected } => match store.count_rows(table).await {
            Ok(observed) => compare(*expected, observed),
            Err(e) => error_outcome(e),
        },

        VerificationTest::ReferentialCheck { table, column } => {
            referential_check(store, set, table, column.as_deref()).await
        }
    }
}

/// Spot-check that no row's foreign-key value is absent from its referenced
/// table's identity set
async fn referential_check(
    store: &dyn Datastore,
    set: &DeclarationSet,
    table: &str,
    column: Option<&str>,
) -> TestOutcome {
    let Some(definition) = set.tables.get(table) else {
        return TestOutcome::Error {
            reason: format!("table `{}` is not declared", table),
        };
    };

    let keys: Vec<_> = definition
        .foreign_keys
        .iter()
        .filter(|fk| match column {
            Some(col) => fk.columns.iter().any(|c| c == col),
            None => true,
        })
        .collect();

    if keys.is_empty() {
        return TestOutcome::Error {
            reason: match column {
                Some(col) => format!("`{}` has no foreign key on column `{}`", table, col),
                None => format!("`{}` declares no foreign keys", table),
            },
        };
    }

    let mut dangling = 0;
    for fk in keys {
        match store.count_dangling(definition, fk).await {
            Ok(count) => dangling += count,
            Err(e) => return error_outcome(e),
        }
    }

    if dangling == 0 {
        TestOutcome::Pass
    } else {
        TestOutcome::Fail {
            expected: "0 dangling rows".to_string(),
            observed: format!("{} dangling rows", dangling),
        }
    }
}

fn compare(expected: u64, observed: u64) -> TestOutcome {
    if expected == observed {
        TestOutcome::Pass
    } else {
        TestOutcome::Fail {
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }
}

fn error_outcome(e: StoreError) -> TestOutcome {
    TestOutcome::Error {
        reason: e.to_string(),
    }
}
