//! Foreign-key dependency graph construction and ordering
//!
//! One node per table, one edge per foreign key from the referencing table
//! to the referenced table. Produces a topological order plus "levels":
//! groups of tables with no ordering constraints between members, seedable
//! concurrently.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use seedline_core::TableDefinition;

/// Graph-build errors; all are fatal for the run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("foreign key on `{table}` references unknown table `{referenced}`")]
    UnknownReference { table: String, referenced: String },

    #[error(
        "foreign key on `{table}` references `{referenced}` ({columns}), \
         which is not its primary key or a unique index"
    )]
    NonIdentityReference {
        table: String,
        referenced: String,
        columns: String,
    },

    #[error("foreign keys form a cycle: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Derived dependency graph, cached for one run and then discarded
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Topological order: every table appears after all tables it references
    order: Vec<String>,

    /// Tables grouped by dependency depth; members of one level have no
    /// ordering constraints between them
    levels: Vec<Vec<String>>,

    /// Direct dependencies (referenced tables), self-references excluded
    parents: BTreeMap<String, BTreeSet<String>>,

    /// Direct dependents (referencing tables), self-references excluded
    children: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph and ordering from the complete definition map
    ///
    /// Self-referencing foreign keys are same-node edges and do not count as
    /// cycles; rows within such tables must be seeded parent-first, which is
    /// enforced at execution time rather than here.
    pub fn build(tables: &BTreeMap<String, TableDefinition>) -> Result<Self, GraphError> {
        let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for name in tables.keys() {
            parents.entry(name.clone()).or_default();
            children.entry(name.clone()).or_default();
        }

        for (name, table) in tables {
            for fk in &table.foreign_keys {
                let referenced = &fk.references.table;
                let target = tables.get(referenced).ok_or_else(|| {
                    GraphError::UnknownReference {
                        table: name.clone(),
                        referenced: referenced.clone(),
                    }
                })?;
                if !target.is_identity_column_set(&fk.references.columns) {
                    return Err(GraphError::NonIdentityReference {
                        table: name.clone(),
                        referenced: referenced.clone(),
                        columns: fk.references.columns.join(", "),
                    });
                }
                if referenced != name {
                    if let Some(set) = parents.get_mut(name) {
                        set.insert(referenced.clone());
                    }
                    if let Some(set) = children.get_mut(referenced) {
                        set.insert(name.clone());
                    }
                }
            }
        }

        detect_cycle(&parents)?;

        // Dependency depth: 0 for tables with no parents, else one past the
        // deepest parent. Acyclicity is already established.
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        fn depth_of<'a>(
            table: &'a str,
            parents: &'a BTreeMap<String, BTreeSet<String>>,
            depth: &mut BTreeMap<&'a str, usize>,
        ) -> usize {
            if let Some(&d) = depth.get(table) {
                return d;
            }
            let d = parents[table]
                .iter()
                .map(|p| depth_of(p, parents, depth) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(table, d);
            d
        }
        let mut max_depth = 0;
        for name in parents.keys() {
            max_depth = max_depth.max(depth_of(name, &parents, &mut depth));
        }

        let mut levels: Vec<Vec<String>> = vec![Vec::new(); max_depth + 1];
        for (table, d) in &depth {
            levels[*d].push(table.to_string());
        }
        let order: Vec<String> = levels.iter().flatten().cloned().collect();

        Ok(Self {
            order,
            levels,
            parents,
            children,
        })
    }

    /// Topological order over all tables
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Level grouping, leaves first
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Direct dependencies of a table (tables it references)
    pub fn dependencies_of<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.parents
            .get(table)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// All transitive dependents of a table (everything that cannot seed if
    /// this table fails)
    pub fn dependents_of(&self, table: &str) -> Vec<String> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<&str> = self
            .children
            .get(table)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
            .collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.to_string()) {
                continue;
            }
            if let Some(next) = self.children.get(current) {
                for child in next {
                    if !visited.contains(child.as_str()) {
                        queue.push_back(child);
                    }
                }
            }
        }

        visited.into_iter().collect()
    }
}

/// Depth-first search with three-color marking; returns the first cycle
/// found as a closed path
fn detect_cycle(parents: &BTreeMap<String, BTreeSet<String>>) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }

    fn visit<'a>(
        table: &'a str,
        parents: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        marks.insert(table, Mark::Gray);
        path.push(table);
        for parent in &parents[table] {
            match marks.get(parent.as_str()).copied().unwrap_or(Mark::White) {
                Mark::Black => {}
                Mark::Gray => {
                    let start = path
                        .iter()
                        .position(|t| *t == parent.as_str())
                        .unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|t| t.to_string()).collect();
                    cycle.push(parent.clone());
                    return Err(GraphError::CyclicDependency { cycle });
                }
                Mark::White => visit(parent, parents, marks, path)?,
            }
        }
        path.pop();
        marks.insert(table, Mark::Black);
        Ok(())
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut path: Vec<&str> = Vec::new();
    for table in parents.keys() {
        if marks.get(table.as_str()).copied().unwrap_or(Mark::White) == Mark::White {
            visit(table, parents, &mut marks, &mut path)?;
        }
    }
    Ok(())
}
