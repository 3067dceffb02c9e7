//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the result to an exit code; this module is the
//! "real main" that:
//! - parses CLI arguments
//! - installs logging
//! - dispatches to the ingest pipeline
//! - prints the run summary

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info};

use crate::cli::{Command, CommonArgs, IngestArgs, LookupArgs};
use crate::domain::IngestConfig;
use crate::error::AppError;
use crate::expiry::{ExpirationResolver, ResolverSettings};

pub mod pipeline;

/// Entry point for the `fbundle` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    let log_dir = error_log_dir(&cli.command);
    let error_log = crate::logging::init_logging(log_dir.as_deref())?;
    if let Some((_, path)) = &error_log {
        info!(log = %path.display(), "logging warnings and errors to file");
    }

    let result = match cli.command {
        Command::Ingest(args) => handle_ingest(args),
        Command::Expirations(args) => handle_expirations(args),
        Command::Lookup(args) => handle_lookup(args),
    };
    if let Err(e) = &result {
        error!(exit_code = e.exit_code(), "{e}");
    }
    result
}

/// Only the commands that scrape or download keep a per-run error log.
fn error_log_dir(command: &Command) -> Option<PathBuf> {
    match command {
        Command::Ingest(args) => Some(args.common.log_dir.clone()),
        Command::Expirations(args) => Some(args.log_dir.clone()),
        Command::Lookup(_) => None,
    }
}

fn handle_ingest(args: IngestArgs) -> Result<(), AppError> {
    let config = ingest_config_from_args(&args.common, args.out_dir);
    let summary = pipeline::run_ingest(&config)?;
    println!("{}", crate::report::format_ingest_summary(&summary));
    Ok(())
}

fn handle_expirations(args: CommonArgs) -> Result<(), AppError> {
    let config = ingest_config_from_args(&args, PathBuf::new());
    let summary = pipeline::run_expirations(&config)?;
    println!("{}", crate::report::format_expiration_summary(&summary));
    Ok(())
}

fn handle_lookup(args: LookupArgs) -> Result<(), AppError> {
    let rows = lookup_expirations(&args.data_dir, args.symbols)?;
    print!("{}", crate::report::format_lookups(&rows));
    Ok(())
}

/// Answer lookups from the cache in `data_dir`, with the resolver's
/// third-Friday fallback.
pub fn lookup_expirations(
    data_dir: &Path,
    symbols: Vec<String>,
) -> Result<Vec<(String, Result<NaiveDate, String>)>, AppError> {
    let mut resolver = ExpirationResolver::new(ResolverSettings::new(data_dir.join("expiration_dates.csv"), false));
    resolver.load_cache()?;
    Ok(symbols
        .into_iter()
        .map(|symbol| {
            let result = resolver.lookup(&symbol).map_err(|e| e.to_string());
            (symbol, result)
        })
        .collect())
}

pub fn ingest_config_from_args(args: &CommonArgs, out_dir: PathBuf) -> IngestConfig {
    IngestConfig {
        data_dir: args.data_dir.clone(),
        out_dir,
        log_dir: args.log_dir.clone(),
        download: !args.offline,
        show_progress: args.progress,
        min_year: args.min_year,
        contracts: args
            .contracts
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    #[test]
    fn config_from_args_normalises_contracts() {
        let cli = Cli::parse_from(["fbundle", "ingest", "--offline", "--contracts", "es, cl,", "--out-dir", "out"]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        let config = ingest_config_from_args(&args.common, args.out_dir.clone());
        assert!(!config.download);
        assert_eq!(config.contracts, vec!["ES", "CL"]);
        assert_eq!(config.out_dir, PathBuf::from("out"));
        assert_eq!(config.expiration_cache(), PathBuf::from("bundles/expiration_dates.csv"));
    }

    #[test]
    fn lookup_keeps_no_error_log() {
        let cli = Cli::parse_from(["fbundle", "lookup", "ESZ24"]);
        assert_eq!(error_log_dir(&cli.command), None);
        let cli = Cli::parse_from(["fbundle", "expirations", "--log-dir", "logs"]);
        assert_eq!(error_log_dir(&cli.command), Some(PathBuf::from("logs")));
    }

    #[test]
    fn lookups_use_cache_then_third_friday() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("expiration_dates.csv"),
            "symbol,expiration_date\nESZ2024,2024-12-20\n",
        )
        .unwrap();

        let symbols = ["ESZ24", "CLH2021", "X"].map(String::from).to_vec();
        let rows = lookup_expirations(dir.path(), symbols).unwrap();
        assert_eq!(rows[0].1, Ok(NaiveDate::from_ymd_opt(2024, 12, 20).unwrap()));
        assert_eq!(rows[1].1, Ok(NaiveDate::from_ymd_opt(2021, 3, 19).unwrap()));
        assert!(rows[2].1.is_err());
    }

    #[test]
    fn lookup_without_cache_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = lookup_expirations(dir.path(), vec!["ESZ24".to_string()]).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG);
    }
}
