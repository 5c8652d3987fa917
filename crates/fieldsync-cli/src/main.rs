//! fieldsync - custom-field reconciliation CLI
//!
//! Thin front-end over `fieldsync-core`: loads materialized snapshots
//! and the cross-mapping config, runs the reconciliation engine against
//! the mapping store, and renders the outcome. All decisions live in the
//! core crate; this binary only parses arguments and formats output.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// fieldsync - reconcile custom fields between two trackers
#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the mapping store database
    #[arg(long, default_value = "fieldsync.db")]
    store: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation pass over the snapshots
    Reconcile {
        /// Source snapshot JSON (field inventory plus assignments)
        #[arg(long)]
        source: PathBuf,

        /// Target field snapshot JSON
        #[arg(long)]
        target: PathBuf,

        /// Cross-mapping TOML (project and tracker id tables)
        #[arg(long)]
        mappings: PathBuf,
    },

    /// Print the pending association plan as JSON
    Plan {
        /// Target field snapshot JSON
        #[arg(long)]
        target: PathBuf,
    },

    /// List mappings and their statuses
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Reconcile {
            source,
            target,
            mappings,
        } => commands::reconcile(&cli.store, &source, &target, &mappings),
        Commands::Plan { target } => commands::plan(&cli.store, &target),
        Commands::Status => commands::status(&cli.store),
    }
}
