//! Command-line parsing for the futures bundle builder.
//!
//! Parsing and dispatch live here and in `app`; nothing below this layer
//! knows about clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "fbundle", version, about = "Futures bundle builder with exchange expiration dates")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download (or load) vendor data, resolve expirations and write the bundle.
    Ingest(IngestArgs),
    /// Build or refresh only the expiration table and print a summary.
    Expirations(CommonArgs),
    /// Print expiration dates for the given contract codes using the cache.
    Lookup(LookupArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    /// Directory holding vendor archives, meta.csv and the expiration cache.
    #[arg(long, default_value = "bundles")]
    pub data_dir: PathBuf,

    /// Directory for the per-run error log.
    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    /// Use files from a previous run instead of downloading.
    #[arg(long)]
    pub offline: bool,

    /// Log progress for long-running steps.
    #[arg(long)]
    pub progress: bool,

    /// Ignore contracts whose year is earlier than this.
    #[arg(long)]
    pub min_year: Option<i32>,

    /// Restrict the run to these root symbols (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub contracts: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Bundle output directory.
    #[arg(long, default_value = "bundles/futures")]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct LookupArgs {
    /// Contract codes, long (`ESZ2024`) or short (`ESZ24`) form.
    #[arg(required = true)]
    pub symbols: Vec<String>,

    #[arg(long, default_value = "bundles")]
    pub data_dir: PathBuf,
}
