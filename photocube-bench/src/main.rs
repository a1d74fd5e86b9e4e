//! Photocube latency benchmark: Neo4j vs PostgreSQL
//!
//! Usage:
//!   photocube-bench complete --reps 10          # point lookups + random states, both backends
//!   photocube-bench state -r 25                 # baseline / materialized / indexed tiers
//!   photocube-bench prepare                     # create the PostgreSQL materialized views
//!   photocube-bench --config bench.toml --seed 7 --export out/ complete

use clap::{Parser, Subcommand};
use colored::Colorize;
use photocube_bench::adapters::neo4j_adapter::Neo4jAdapter;
use photocube_bench::adapters::postgres_adapter::PostgresAdapter;
use photocube_bench::config::BenchConfig;
use photocube_bench::{report, workloads};
use photocube_bench::{
    release_backend, BenchResult, LatencyDataset, PhotocubeBackend, QueryGen,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "photocube-bench", about = "Photocube query latency: Neo4j vs PostgreSQL")]
#[command(version)]
struct Cli {
    /// TOML file with connection settings and dataset cardinalities.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed for the query synthesizer (overrides the config file).
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Export directory for CSV + JSON results.
    #[arg(long, global = true)]
    export: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Point lookups and random browsing states on both backends.
    Complete {
        /// Number of repetitions.
        #[arg(short = 'r', long = "reps", visible_alias = "r", default_value = "10")]
        reps: usize,
    },
    /// Simple/medium/complex states: baseline vs materialized vs indexed views.
    State {
        /// Number of repetitions.
        #[arg(short = 'r', long = "reps", visible_alias = "r", default_value = "10")]
        reps: usize,
    },
    /// Create the materialized views used by the optimized PostgreSQL queries.
    Prepare,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("benchmark aborted: {}", e);
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> BenchResult<()> {
    let mut cfg = match &cli.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };
    if cli.seed.is_some() {
        cfg.seed = cli.seed;
    }

    match cli.command {
        Command::Complete { reps } => {
            let mut gen = match cfg.seed {
                Some(seed) => QueryGen::new(seed, cfg.cardinalities),
                None => QueryGen::from_entropy(cfg.cardinalities),
            };
            let results = with_both_backends(&cfg, |graph, relational| {
                workloads::complete_scenario(graph, relational, reps, &mut gen)
            })?;
            let title = format!(
                "Latency of Photocube queries of Neo4j and PostgreSQL\nQuery repetitions: {}",
                reps
            );
            publish(&title, &results, cli.export.as_deref())
        }
        Command::State { reps } => {
            let results = with_relational(&cfg, |relational| {
                workloads::state_scenario(relational, reps)
            })?;
            let title = format!("Photocube state latency results\nQuery repetitions: {}", reps);
            publish(&title, &results, cli.export.as_deref())
        }
        Command::Prepare => with_relational(&cfg, |relational| relational.create_materialized_views()),
    }
}

/// Open PostgreSQL, run `f`, and close the connection whatever `f` returned.
fn with_relational<T, F>(cfg: &BenchConfig, f: F) -> BenchResult<T>
where
    F: FnOnce(&mut PostgresAdapter) -> BenchResult<T>,
{
    let mut relational = PostgresAdapter::connect(&cfg.postgres)?;
    let outcome = f(&mut relational);
    let closed = relational.close();
    let value = outcome?;
    closed?;
    Ok(value)
}

/// Open both backends, run `f`, and close both whatever `f` returned.
fn with_both_backends<T, F>(cfg: &BenchConfig, f: F) -> BenchResult<T>
where
    F: FnOnce(&mut dyn PhotocubeBackend, &mut dyn PhotocubeBackend) -> BenchResult<T>,
{
    let mut graph = Neo4jAdapter::connect(&cfg.neo4j)?;
    let mut relational = match PostgresAdapter::connect(&cfg.postgres) {
        Ok(db) => db,
        Err(e) => {
            release_backend(&mut graph);
            return Err(e);
        }
    };
    let outcome = f(&mut graph, &mut relational);
    let graph_closed = graph.close();
    let relational_closed = relational.close();
    let value = outcome?;
    graph_closed?;
    relational_closed?;
    Ok(value)
}

fn publish(title: &str, results: &LatencyDataset, export: Option<&Path>) -> BenchResult<()> {
    info!(observations = results.len(), "benchmark finished");
    let summaries = report::summarize(results)?;
    report::print_report(title, &summaries);

    if let Some(dir) = export {
        std::fs::create_dir_all(dir)?;
        report::export_csv(results, &dir.join("latency_results.csv"))?;
        report::export_json(title, results, &summaries, &dir.join("latency_results.json"))?;
    }
    Ok(())
}
