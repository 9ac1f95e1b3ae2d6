//! Run report schema (stable v1)
//!
//! The report is the single source of truth for a run's outcome: the CLI
//! derives its exit code from the aggregated report, never from exceptions.

use serde::{Deserialize, Serialize};

use crate::verify::{TestOutcome, VerificationTest};

/// Phases of a run, in order
///
/// A fatal error while `Loading` or `GraphBuilding` transitions directly to
/// `Reported` with zero tables seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Loading,
    GraphBuilding,
    Seeding,
    Verifying,
    Reported,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::GraphBuilding => write!(f, "graph-building"),
            Self::Seeding => write!(f, "seeding"),
            Self::Verifying => write!(f, "verifying"),
            Self::Reported => write!(f, "reported"),
        }
    }
}

/// Outcome of one table's seed application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeedStatus {
    /// The plan's transaction committed
    Seeded { inserted: u64, skipped: u64 },

    /// The table has a definition but no seed plan; only its schema was
    /// applied
    Schema,

    /// The table's transaction rolled back
    Failed { error: String },

    /// Never attempted: a table it depends on did not complete successfully
    Blocked { waiting_on: String },

    /// Never attempted: cancellation was requested first
    Cancelled,
}

impl SeedStatus {
    /// Whether dependents of this table may proceed and its tests may be
    /// evaluated
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Seeded { .. } | Self::Schema)
    }
}

/// Per-table entry in the seeding section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSeedReport {
    /// Table name
    pub table: String,

    /// What happened to the table's seed
    #[serde(flatten)]
    pub status: SeedStatus,
}

/// One evaluated verification test with its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// The declared assertion
    pub test: VerificationTest,

    /// What the dispatcher observed
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub tables_seeded: usize,
    pub tables_failed: usize,
    pub tables_blocked: usize,
    pub rows_inserted: u64,
    pub rows_skipped: u64,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_errored: usize,
}

/// Final status of a run, derived from the aggregated report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Seeding succeeded and every verification passed
    Success,

    /// One or more table seeds failed or were blocked/cancelled
    SeedingFailed,

    /// Seeding succeeded but one or more assertions did not hold
    VerificationFailed,

    /// The run aborted while loading declarations or building the graph
    LoadFailed,
}

impl RunStatus {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::SeedingFailed => 1,
            Self::VerificationFailed => 2,
            Self::LoadFailed => 3,
        }
    }
}

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    pub major: u32,
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Run report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// The furthest phase the run entered before reporting
    pub phase_reached: RunPhase,

    /// Fatal load/graph error, when the run aborted before seeding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,

    /// Per-table seed outcomes
    pub seeding: Vec<TableSeedReport>,

    /// Per-test verification outcomes
    pub verifications: Vec<VerificationOutcome>,

    /// Summary statistics
    pub summary: RunSummary,
}

impl RunReport {
    /// Create an empty report stamped with the current time
    pub fn new(phase_reached: RunPhase) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            phase_reached,
            fatal: None,
            seeding: Vec::new(),
            verifications: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    /// Build the report for a run that aborted before seeding
    pub fn fatal(phase: RunPhase, error: impl Into<String>) -> Self {
        let mut report = Self::new(phase);
        report.fatal = Some(error.into());
        report
    }

    /// Record one table's seed outcome
    pub fn push_seed(&mut self, entry: TableSeedReport) {
        match &entry.status {
            SeedStatus::Seeded { inserted, skipped } => {
                self.summary.tables_seeded += 1;
                self.summary.rows_inserted += inserted;
                self.summary.rows_skipped += skipped;
            }
            SeedStatus::Schema => self.summary.tables_seeded += 1,
            SeedStatus::Failed { .. } => self.summary.tables_failed += 1,
            SeedStatus::Blocked { .. } | SeedStatus::Cancelled => {
                self.summary.tables_blocked += 1
            }
        }
        self.seeding.push(entry);
    }

    /// Record one verification outcome
    pub fn push_verification(&mut self, entry: VerificationOutcome) {
        match &entry.outcome {
            TestOutcome::Pass => self.summary.tests_passed += 1,
            TestOutcome::Fail { .. } => self.summary.tests_failed += 1,
            TestOutcome::Error { .. } => self.summary.tests_errored += 1,
        }
        self.verifications.push(entry);
    }

    /// Whether every attempted table seed committed
    pub fn seeding_succeeded(&self) -> bool {
        self.fatal.is_none()
            && self.summary.tables_failed == 0
            && self.summary.tables_blocked == 0
    }

    /// Final status, the conjunction of all outcomes
    pub fn status(&self) -> RunStatus {
        if self.fatal.is_some() {
            return RunStatus::LoadFailed;
        }
        if !self.seeding_succeeded() {
            return RunStatus::SeedingFailed;
        }
        if self.summary.tests_failed > 0 || self.summary.tests_errored > 0 {
            return RunStatus::VerificationFailed;
        }
        RunStatus::Success
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn phases_are_ordered() {
        assert!(RunPhase::Loading < RunPhase::Seeding);
        assert!(RunPhase::Verifying < RunPhase::Reported);
    }

    #[test]
    fn fatal_report_maps_to_exit_3() {
        let report = RunReport::fatal(RunPhase::GraphBuilding, "cycle detected");
        assert_eq!(report.status(), RunStatus::LoadFailed);
        assert_eq!(report.status().exit_code(), 3);
        assert!(report.seeding.is_empty());
    }

    #[test]
    fn seed_failure_trumps_verification_failure() {
        let mut report = RunReport::new(RunPhase::Reported);
        report.push_seed(TableSeedReport {
            table: "employers".to_string(),
            status: SeedStatus::Failed {
                error: "dangling reference".to_string(),
            },
        });
        report.push_verification(VerificationOutcome {
            test: VerificationTest::RowCount {
                table: "employers".to_string(),
                expected: 8,
            },
            outcome: TestOutcome::Error {
                reason: "table was never seeded".to_string(),
            },
        });

        assert_eq!(report.status(), RunStatus::SeedingFailed);
        assert_eq!(report.status().exit_code(), 1);
    }

    #[test]
    fn verification_failure_with_clean_seeding_is_exit_2() {
        let mut report = RunReport::new(RunPhase::Reported);
        report.push_seed(TableSeedReport {
            table: "users".to_string(),
            status: SeedStatus::Seeded {
                inserted: 1,
                skipped: 0,
            },
        });
        report.push_verification(VerificationOutcome {
            test: VerificationTest::RowCount {
                table: "users".to_string(),
                expected: 2,
            },
            outcome: TestOutcome::Fail {
                expected: "2".to_string(),
                observed: "1".to_string(),
            },
        });

        assert_eq!(report.status(), RunStatus::VerificationFailed);
        assert_eq!(report.status().exit_code(), 2);
    }

    #[test]
    fn summary_accumulates() {
        let mut report = RunReport::new(RunPhase::Reported);
        report.push_seed(TableSeedReport {
            table: "users".to_string(),
            status: SeedStatus::Seeded {
                inserted: 1,
                skipped: 2,
            },
        });
        report.push_seed(TableSeedReport {
            table: "employers".to_string(),
            status: SeedStatus::Blocked {
                waiting_on: "users".to_string(),
            },
        });

        assert_eq!(report.summary.rows_inserted, 1);
        assert_eq!(report.summary.rows_skipped, 2);
        assert_eq!(report.summary.tables_blocked, 1);
        assert!(!report.seeding_succeeded());
    }

    #[test]
    fn report_serialization() {
        let report = RunReport::new(RunPhase::Reported);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"seeding\""));
        assert!(json.contains("\"verifications\""));
    }
}
