//! Seedline declaration loading
//!
//! Parses declaration files into typed table definitions, seed plans, and
//! verification tests, and derives the foreign-key dependency graph that
//! fixes the seed application order.

pub mod file;
pub mod graph;
pub mod loader;

pub use file::{DeclFile, SeedDecl, TableDecl};
pub use graph::{DependencyGraph, GraphError};
pub use loader::{load_dir, DeclarationSet, LoadError};
