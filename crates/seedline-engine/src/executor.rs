//! Seed planner/executor
//!
//! Walks the dependency levels in order. Tables within a level seed
//! concurrently, bounded by a semaphore sized to the datastore's safe
//! concurrent-connection limit. A table whose dependency did not complete
//! successfully is never attempted; siblings proceed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use seedline_core::{SeedPlan, SeedStatus, TableDefinition, TableSeedReport};
use seedline_decl::{DeclarationSet, DependencyGraph};
use seedline_store::Datastore;

/// Everything the seeding phase produced
#[derive(Debug)]
pub struct SeedExecution {
    /// Per-table outcomes, in topological order
    pub reports: Vec<TableSeedReport>,

    /// Tables whose schema (and seed, if any) applied successfully
    pub succeeded: BTreeSet<String>,

    /// False when cancellation interrupted the phase; verification must not
    /// start in that case
    pub completed: bool,
}

/// Apply every seed plan in dependency order
pub async fn seed_all(
    store: Arc<dyn Datastore>,
    set: &DeclarationSet,
    graph: &DependencyGraph,
    max_in_flight: usize,
    cancel: watch::Receiver<bool>,
) -> SeedExecution {
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut statuses: BTreeMap<String, SeedStatus> = BTreeMap::new();
    let mut succeeded: BTreeSet<String> = BTreeSet::new();
    let mut cancelled = false;

    for level in graph.levels() {
        if !cancelled && *cancel.borrow() {
            cancelled = true;
        }

        let mut join: JoinSet<(String, SeedStatus)> = JoinSet::new();

        for table in level {
            if cancelled {
                statuses.insert(table.clone(), SeedStatus::Cancelled);
                continue;
            }
            if let Some(dep) = graph
                .dependencies_of(table)
                .find(|dep| !succeeded.contains(*dep))
            {
                info!(table = %table, waiting_on = %dep, "seed blocked");
                statuses.insert(
                    table.clone(),
                    SeedStatus::Blocked {
                        waiting_on: dep.to_string(),
                    },
                );
                continue;
            }
            let Some(definition) = set.tables.get(table) else {
                continue;
            };

            let definition = definition.clone();
            let plan = set.seed_for(table).cloned();
            let store = Arc::clone(&store);
            let permits = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            join.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                if *cancel.borrow() {
                    return (definition.name.clone(), SeedStatus::Cancelled);
                }
                let status = seed_one(store.as_ref(), &definition, plan.as_ref()).await;
                (definition.name, status)
            });
        }

        // Level barrier: the next level may only start once every in-flight
        // transaction here has committed or rolled back.
        while let Some(result) = join.join_next().await {
            match result {
                Ok((table, status)) => {
                    if status.is_success() {
                        succeeded.insert(table.clone());
                    }
                    statuses.insert(table, status);
                }
                Err(e) => warn!(error = %e, "seed task aborted"),
            }
        }

        if !cancelled && *cancel.borrow() {
            cancelled = true;
        }
    }

    let reports = graph
        .order()
        .iter()
        .filter_map(|table| {
            statuses.remove(table).map(|status| TableSeedReport {
                table: table.clone(),
                status,
            })
        })
        .collect();

    SeedExecution {
        reports,
        succeeded,
        completed: !cancelled,
    }
}

/// Apply one table's schema and seed; failures stay scoped to this table
async fn seed_one(
    store: &dyn Datastore,
    definition: &TableDefinition,
    plan: Option<&SeedPlan>,
) -> SeedStatus {
    if let Err(e) = store.ensure_table(definition).await {
        warn!(table = %definition.name, error = %e, "schema application failed");
        return SeedStatus::Failed {
            error: e.to_string(),
        };
    }

    match plan {
        None => {
            info!(table = %definition.name, "schema applied, no seed declared");
            SeedStatus::Schema
        }
        Some(plan) => match store.apply_seed(definition, plan).await {
            Ok(outcome) => {
                info!(
                    table = %definition.name,
                    inserted = outcome.inserted,
                    skipped = outcome.skipped,
                    "seed committed"
                );
                SeedStatus::Seeded {
                    inserted: outcome.inserted,
                    skipped: outcome.skipped,
                }
            }
            Err(e) => {
                warn!(table = %definition.name, error = %e, "seed rolled back");
                SeedStatus::Failed {
                    error: e.to_string(),
                }
            }
        },
    }
}
