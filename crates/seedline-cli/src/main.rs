use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use seedline_core::{
    Config, RunReport, SeedStatus, StoreConfig, TestOutcome,
};
use seedline_decl::{DeclarationSet, DependencyGraph};
use seedline_engine::{load_and_graph, Runner};
use seedline_store::{Datastore, MemoryStore, SqliteStore};

/// Seedline - declarative schema and seed orchestration
#[derive(Parser)]
#[command(name = "seedline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: seedline.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Declaration directory, overriding the configured one
    #[arg(short, long, global = true)]
    decl_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load declarations, build the graph, and print the seed order; no writes
    Plan,

    /// Load, build the graph, and seed; no verification
    Apply {
        /// Output file for the JSON report (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run verification against already-seeded data
    Verify {
        /// Output file for the JSON report (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply, then verify
    Run {
        /// Output file for the JSON report (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if std::path::Path::new("seedline.toml").exists() {
        Config::from_file(std::path::Path::new("seedline.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };
    if let Some(decl_dir) = cli.decl_dir {
        config.decl_dir = decl_dir;
    }

    match cli.command {
        Commands::Plan => plan_command(&config),
        Commands::Apply { output } => apply_command(&config, output, false).await,
        Commands::Verify { output } => verify_command(&config, output).await,
        Commands::Run { output } => apply_command(&config, output, true).await,
    }
}

/// Print the dependency order without touching the datastore
fn plan_command(config: &Config) -> Result<()> {
    let (set, graph) = match load_and_graph(&config.decl_dir) {
        Ok(loaded) => loaded,
        Err(report) => return finish(*report, None),
    };

    println!("{}", "Seed plan".bold().bright_blue());
    println!();
    for (depth, level) in graph.levels().iter().enumerate() {
        println!("{} {}", "level".bold(), depth);
        for table in level {
            let detail = match set.seed_for(table) {
                Some(plan) => format!("{} rows", plan.row_count()),
                None => "schema only".to_string(),
            };
            let deps: Vec<&str> = graph.dependencies_of(table).collect();
            if deps.is_empty() {
                println!("  {} ({})", table.green(), detail);
            } else {
                println!(
                    "  {} ({}, after {})",
                    table.green(),
                    detail,
                    deps.join(", ")
                );
            }
        }
    }
    println!();
    println!(
        "{} tables, {} seeds, {} verification tests",
        set.tables.len(),
        set.seeds.len(),
        set.tests.len()
    );
    Ok(())
}

/// Seed the datastore; with `and_verify` this is the full `run` command
async fn apply_command(
    config: &Config,
    output: Option<PathBuf>,
    and_verify: bool,
) -> Result<()> {
    let (set, graph) = match load_and_graph(&config.decl_dir) {
        Ok(loaded) => loaded,
        Err(report) => return finish(*report, output.or_else(|| Some(config.report_path.clone()))),
    };

    let store = build_store(config, false)?;
    let runner = Runner::new(store, config.max_connections);
    let cancel = cancellation_signal();

    let report = if and_verify {
        runner.run(&set, &graph, cancel).await
    } else {
        runner.apply(&set, &graph, cancel).await
    };

    print_report(&report, &set, &graph);
    finish(report, output.or_else(|| Some(config.report_path.clone())))
}

/// Evaluate the declared tests against whatever is already in the datastore
async fn verify_command(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let (set, _graph) = match load_and_graph(&config.decl_dir) {
        Ok(loaded) => loaded,
        Err(report) => return finish(*report, output.or_else(|| Some(config.report_path.clone()))),
    };

    let store = build_store(config, true)?;
    let runner = Runner::new(store, config.max_connections);
    let report = runner.verify(&set).await;

    print_verifications(&report);
    print_summary(&report);
    finish(report, output.or_else(|| Some(config.report_path.clone())))
}

fn build_store(config: &Config, read_only: bool) -> Result<Arc<dyn Datastore>> {
    let store: Arc<dyn Datastore> = match &config.store {
        StoreConfig::Sqlite { path } => {
            if read_only {
                Arc::new(SqliteStore::open_read_only(path)?)
            } else {
                Arc::new(SqliteStore::open(path)?)
            }
        }
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Flip the cancellation signal on Ctrl-C; in-flight table transactions
/// still complete or roll back before the process exits
fn cancellation_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "cancellation requested, finishing in-flight work".yellow());
            let _ = tx.send(true);
        }
    });
    rx
}

/// Write the report file, print the verdict line, and exit with the status
/// code the report dictates
fn finish(report: RunReport, output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = &output {
        report.save_to_file(path)?;
    }

    let status = report.status();
    let code = status.exit_code();
    match code {
        0 => println!("{}", "✓ run succeeded".green().bold()),
        1 => println!("{}", "✗ seeding failed".red().bold()),
        2 => println!("{}", "✗ verification failed".red().bold()),
        _ => {
            if let Some(fatal) = &report.fatal {
                eprintln!("{} {}", "✗ fatal:".red().bold(), fatal);
            }
        }
    }

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn print_report(report: &RunReport, set: &DeclarationSet, graph: &DependencyGraph) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Seed Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    for entry in &report.seeding {
        match &entry.status {
            SeedStatus::Seeded { inserted, skipped } => println!(
                "  {} {} ({} inserted, {} skipped)",
                "✓".green(),
                entry.table,
                inserted,
                skipped
            ),
            SeedStatus::Schema => {
                println!("  {} {} (schema only)", "✓".green(), entry.table)
            }
            SeedStatus::Failed { error } => {
                println!("  {} {}: {}", "✗".red(), entry.table, error);
                let dependents = graph.dependents_of(&entry.table);
                if !dependents.is_empty() {
                    println!("    blocks: {}", dependents.join(", ").yellow());
                }
            }
            SeedStatus::Blocked { waiting_on } => println!(
                "  {} {} (blocked, waiting on {})",
                "⊘".yellow(),
                entry.table,
                waiting_on
            ),
            SeedStatus::Cancelled => {
                println!("  {} {} (cancelled)", "⊘".yellow(), entry.table)
            }
        }
    }

    if !report.verifications.is_empty() {
        print_verifications(report);
    } else if set.tests.is_empty() {
        println!();
        println!("{}", "No verification tests declared".yellow());
    }

    print_summary(report);
}

fn print_verifications(report: &RunReport) {
    println!();
    println!("{}", "Verifications:".bold());
    for entry in &report.verifications {
        match &entry.outcome {
            TestOutcome::Pass => println!("  {} {}", "✓".green(), entry.test),
            TestOutcome::Fail { expected, observed } => {
                println!("  {} {}", "✗".red(), entry.test);
                println!("    Expected: {}", expected);
                println!("    Observed: {}", observed);
            }
            TestOutcome::Error { reason } => {
                println!("  {} {} ({})", "?".yellow(), entry.test, reason)
            }
        }
    }
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    println!();
    println!("{}", "Summary:".bold());
    println!(
        "  Tables: {} seeded, {} failed, {} blocked",
        summary.tables_seeded, summary.tables_failed, summary.tables_blocked
    );
    println!(
        "  Rows:   {} inserted, {} skipped",
        summary.rows_inserted, summary.rows_skipped
    );
    println!(
        "  Tests:  {} passed, {} failed, {} errored",
        summary.tests_passed, summary.tests_failed, summary.tests_errored
    );
    println!();
    println!("{}", "=".repeat(60).bright_blue());
}
