//! Run orchestration across phases
//!
//! A run moves Loading -> GraphBuilding -> Seeding -> Verifying -> Reported.
//! Fatal errors in the first two phases produce a report directly, with zero
//! tables seeded; everything after that is accumulated, never thrown.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use seedline_core::{RunPhase, RunReport};
use seedline_decl::{load_dir, DeclarationSet, DependencyGraph};
use seedline_store::Datastore;

use crate::executor::seed_all;
use crate::verifier::run_tests;

/// Load declarations and derive the dependency graph
///
/// On failure the returned report is final: status `LoadFailed`, exit code 3.
pub fn load_and_graph(
    decl_dir: &Path,
) -> Result<(DeclarationSet, DependencyGraph), Box<RunReport>> {
    let set = match load_dir(decl_dir) {
        Ok(set) => set,
        Err(e) => return Err(Box::new(RunReport::fatal(RunPhase::Loading, e.to_string()))),
    };
    info!(
        tables = set.tables.len(),
        seeds = set.seeds.len(),
        tests = set.tests.len(),
        "declarations loaded"
    );

    let graph = match DependencyGraph::build(&set.tables) {
        Ok(graph) => graph,
        Err(e) => {
            return Err(Box::new(RunReport::fatal(
                RunPhase::GraphBuilding,
                e.to_string(),
            )))
        }
    };
    info!(levels = graph.levels().len(), "dependency graph built");

    Ok((set, graph))
}

/// Executes seeding and verification against one datastore
pub struct Runner {
    store: Arc<dyn Datastore>,
    max_in_flight: usize,
}

impl Runner {
    pub fn new(store: Arc<dyn Datastore>, max_in_flight: usize) -> Self {
        Self {
            store,
            max_in_flight,
        }
    }

    /// Seed only; no verification
    pub async fn apply(
        &self,
        set: &DeclarationSet,
        graph: &DependencyGraph,
        cancel: watch::Receiver<bool>,
    ) -> RunReport {
        let execution = seed_all(
            Arc::clone(&self.store),
            set,
            graph,
            self.max_in_flight,
            cancel,
        )
        .await;

        let mut report = RunReport::new(if execution.completed {
            RunPhase::Reported
        } else {
            RunPhase::Seeding
        });
        for entry in execution.reports {
            report.push_seed(entry);
        }
        report
    }

    /// Verify only, against already-seeded data
    pub async fn verify(&self, set: &DeclarationSet) -> RunReport {
        let mut report = RunReport::new(RunPhase::Reported);
        let outcomes = run_tests(self.store.as_ref(), set, &BTreeSet::new()).await;
        for outcome in outcomes {
            report.push_verification(outcome);
        }
        report
    }

    /// Apply then verify
    ///
    /// Verification covers all tables that seeded successfully even when
    /// siblings failed; it never starts if cancellation interrupted seeding.
    pub async fn run(
        &self,
        set: &DeclarationSet,
        graph: &DependencyGraph,
        cancel: watch::Receiver<bool>,
    ) -> RunReport {
        let execution = seed_all(
            Arc::clone(&self.store),
            set,
            graph,
            self.max_in_flight,
            cancel,
        )
        .await;

        let mut report = RunReport::new(RunPhase::Seeding);
        let succeeded = execution.succeeded.clone();
        for entry in execution.reports {
            report.push_seed(entry);
        }

        if !execution.completed {
            info!("cancellation requested during seeding; verification skipped");
            return report;
        }

        report.phase_reached = RunPhase::Reported;
        let unseeded: BTreeSet<String> = set
            .tables
            .keys()
            .filter(|table| !succeeded.contains(*table))
            .cloned()
            .collect();
        let outcomes = run_tests(self.store.as_ref(), set, &unseeded).await;
        for outcome in outcomes {
            report.push_verification(outcome);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use seedline_core::{RunStatus, SeedStatus, TestOutcome, VerificationTest};
    use seedline_store::MemoryStore;
    use std::path::PathBuf;

    fn write_decl(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn users_and_employers(dir: &Path) {
        write_decl(
            dir,
            "10_users.toml",
            r#"
            [table]
            name = "users"
            primary_key = ["id"]

            [[table.columns]]
            name = "id"
            type = "uuid"
            nullable = false

            [seed]
            table = "users"
            sql = "INSERT INTO users (id) VALUES ('u1')"

            [seed.locals]
            row_count = 1
            "#,
        );
        write_decl(
            dir,
            "20_employers.toml",
            r#"
            [table]
            name = "employers"
            primary_key = ["id"]

            [[table.columns]]
            name = "id"
            type = "uuid"
            nullable = false

            [[table.columns]]
            name = "user_id"
            type = "uuid"
            nullable = false

            [[table.foreign_keys]]
            columns = ["user_id"]
            references = { table = "users", columns = ["id"] }

            [seed]
            table = "employers"
            sql = """
            INSERT INTO employers (id, user_id) VALUES
                ('e1', 'u1'), ('e2', 'u1'), ('e3', 'u1'), ('e4', 'u1'),
                ('e5', 'u1'), ('e6', 'u1'), ('e7', 'u1'), ('e8', 'u1');
            """

            [seed.locals]
            row_count = 8

            [[verify]]
            kind = "referential-check"
            table = "employers"
            "#,
        );
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn end_to_end_run_seeds_in_order_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        users_and_employers(dir.path());

        let (set, graph) = load_and_graph(dir.path()).unwrap();
        let runner = Runner::new(Arc::new(MemoryStore::new()), 4);
        let report = runner.run(&set, &graph, no_cancel()).await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.summary.rows_inserted, 9);
        assert_eq!(report.seeding[0].table, "users");
        assert_eq!(report.seeding[1].table, "employers");
        // referential-check plus two implicit row-count tests
        assert_eq!(report.verifications.len(), 3);
        assert!(report.verifications.iter().all(|v| v.outcome.is_pass()));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        users_and_employers(dir.path());

        let (set, graph) = load_and_graph(dir.path()).unwrap();
        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let runner = Runner::new(Arc::clone(&store), 4);

        let first = runner.run(&set, &graph, no_cancel()).await;
        assert_eq!(first.summary.rows_inserted, 9);

        let second = runner.run(&set, &graph, no_cancel()).await;
        assert_eq!(second.status(), RunStatus::Success);
        assert_eq!(second.summary.rows_inserted, 0);
        assert_eq!(second.summary.rows_skipped, 9);
        assert_eq!(store.count_rows("employers").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn dangling_seed_rolls_back_one_table_only() {
        let dir = tempfile::tempdir().unwrap();
        users_and_employers(dir.path());
        // Overwrite the employers seed with a row referencing a missing user.
        write_decl(
            dir.path(),
            "20_employers.toml",
            r#"
            [table]
            name = "employers"
            primary_key = ["id"]

            [[table.columns]]
            name = "id"
            type = "uuid"
            nullable = false

            [[table.columns]]
            name = "user_id"
            type = "uuid"
            nullable = false

            [[table.foreign_keys]]
            columns = ["user_id"]
            references = { table = "users", columns = ["id"] }

            [seed]
            table = "employers"
            sql = "INSERT INTO employers (id, user_id) VALUES ('e1', 'nobody')"
            "#,
        );

        let (set, graph) = load_and_graph(dir.path()).unwrap();
        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let runner = Runner::new(Arc::clone(&store), 4);
        let report = runner.apply(&set, &graph, no_cancel()).await;

        assert_eq!(report.status(), RunStatus::SeedingFailed);
        assert_eq!(report.status().exit_code(), 1);

        let employers = report
            .seeding
            .iter()
            .find(|r| r.table == "employers")
            .unwrap();
        assert!(matches!(&employers.status, SeedStatus::Failed { error }
            if error.contains("dangling reference")));

        // users stays seeded, employers stays empty.
        assert_eq!(store.count_rows("users").await.unwrap(), 1);
        assert_eq!(store.count_rows("employers").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn declared_row_count_mismatch_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        write_decl(
            dir.path(),
            "users.toml",
            r#"
            [table]
            name = "users"
            primary_key = ["id"]

            [[table.columns]]
            name = "id"
            type = "uuid"
            nullable = false

            [seed]
            table = "users"
            sql = "INSERT INTO users (id) VALUES ('u1'), ('u2')"

            [seed.locals]
            row_count = 8
            "#,
        );

        let (set, graph) = load_and_graph(dir.path()).unwrap();
        let runner = Runner::new(Arc::new(MemoryStore::new()), 4);
        let report = runner.run(&set, &graph, no_cancel()).await;

        assert_eq!(report.status(), RunStatus::VerificationFailed);
        assert_eq!(report.status().exit_code(), 2);
        assert_eq!(
            report.verifications[0].outcome,
            TestOutcome::Fail {
                expected: "8".to_string(),
                observed: "2".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn cyclic_schema_reports_fatal_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        write_decl(
            dir.path(),
            "a.toml",
            r#"
            [table]
            name = "a"
            primary_key = ["id"]

            [[table.columns]]
            name = "id"
            type = "uuid"
            nullable = false

            [[table.columns]]
            name = "b_id"
            type = "uuid"

            [[table.foreign_keys]]
            columns = ["b_id"]
            references = { table = "b", columns = ["id"] }
            "#,
        );
        write_decl(
            dir.path(),
            "b.toml",
            r#"
            [table]
            name = "b"
            primary_key = ["id"]

            [[table.columns]]
            name = "id"
            type = "uuid"
            nullable = false

            [[table.columns]]
            name = "a_id"
            type = "uuid"

            [[table.foreign_keys]]
            columns = ["a_id"]
            references = { table = "a", columns = ["id"] }
            "#,
        );

        let report = match load_and_graph(dir.path()) {
            Ok(_) => panic!("cycle must not produce a graph"),
            Err(report) => report,
        };

        assert_eq!(report.status(), RunStatus::LoadFailed);
        assert_eq!(report.phase_reached, RunPhase::GraphBuilding);
        assert!(report.fatal.as_deref().unwrap_or("").contains("cycle"));
        assert_eq!(report.summary.tables_seeded, 0);
    }

    #[tokio::test]
    async fn cancelled_run_skips_verification() {
        let dir = tempfile::tempdir().unwrap();
        users_and_employers(dir.path());

        let (set, graph) = load_and_graph(dir.path()).unwrap();
        let runner = Runner::new(Arc::new(MemoryStore::new()), 4);
        let (_tx, rx) = watch::channel(true);
        let report = runner.run(&set, &graph, rx).await;

        assert_eq!(report.phase_reached, RunPhase::Seeding);
        assert!(report.verifications.is_empty());
        assert_eq!(report.status(), RunStatus::SeedingFailed);
    }

    #[test]
    fn missing_directory_is_a_load_failure() {
        let report = match load_and_graph(&PathBuf::from("/nonexistent/decl/dir")) {
            Ok(_) => panic!("missing directory must fail"),
            Err(report) => report,
        };
        assert_eq!(report.status(), RunStatus::LoadFailed);
        assert_eq!(report.phase_reached, RunPhase::Loading);
    }
}
