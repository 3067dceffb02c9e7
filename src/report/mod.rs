//! Terminal summaries for `fbundle` runs.
//!
//! Formatting lives here so the pipeline only returns data and the output
//! format can change in one place.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::domain::ExpirationSource;
use crate::expiry::{BuildState, ScrapeStats};

/// What `fbundle expirations` reports.
#[derive(Debug, Clone)]
pub struct ExpirationSummary {
    pub cache_path: String,
    pub downloaded: bool,
    pub state: BuildState,
    pub entries: usize,
    pub scrape: Option<ScrapeStats>,
}

/// What `fbundle ingest` reports.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub expirations: ExpirationSummary,
    pub specs: usize,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub rows_malformed: usize,
    pub contracts: usize,
    pub roots: usize,
    pub skipped_without_meta: usize,
    pub by_source: HashMap<ExpirationSource, usize>,
    pub daily_files: usize,
    pub out_dir: String,
}

pub fn format_expiration_summary(summary: &ExpirationSummary) -> String {
    let mut out = String::new();
    let mode = if summary.downloaded { "scraped" } else { "loaded from cache" };
    out.push_str(&format!("Expiration table: {} entries ({mode})\n", summary.entries));
    out.push_str(&format!("Cache: {}\n", summary.cache_path));
    if summary.state != BuildState::Ready {
        out.push_str(&format!("State: {:?}\n", summary.state));
    }
    if let Some(stats) = &summary.scrape {
        out.push_str(&format!(
            "Calendars: fetched={} failed={} shared={} rows={}\n",
            stats.roots_fetched, stats.roots_failed, stats.cache_hits, stats.rows
        ));
    }
    out
}

pub fn format_ingest_summary(summary: &IngestSummary) -> String {
    let mut out = String::new();
    out.push_str("=== fbundle - futures bundle ===\n");
    out.push_str(&format_expiration_summary(&summary.expirations));
    out.push_str(&format!("Vendor specs: {}\n", summary.specs));
    out.push_str(&format!(
        "Price rows: read={} dropped={} malformed={}\n",
        summary.rows_read, summary.rows_dropped, summary.rows_malformed
    ));
    out.push_str(&format!(
        "Contracts: {} across {} roots ({} skipped without root metadata)\n",
        summary.contracts, summary.roots, summary.skipped_without_meta
    ));
    out.push_str(&format_source_counts(&summary.by_source));
    out.push_str(&format!("Wrote {} daily files to {}\n", summary.daily_files, summary.out_dir));
    out
}

/// One line per expiration source, in precedence order, with its share.
pub fn format_source_counts(by_source: &HashMap<ExpirationSource, usize>) -> String {
    let total: usize = by_source.values().sum();
    let mut out = String::from("Expiration sources:\n");
    for source in ExpirationSource::ALL {
        let n = by_source.get(&source).copied().unwrap_or(0);
        let pct = if total == 0 { 0.0 } else { 100.0 * n as f64 / total as f64 };
        out.push_str(&format!("  {:<18} {:>6} ({pct:>5.1}%)\n", source.label(), n));
    }
    out
}

/// `symbol  date` lines for `fbundle lookup`.
pub fn format_lookups(rows: &[(String, Result<NaiveDate, String>)]) -> String {
    let width = rows.iter().map(|(s, _)| s.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (symbol, result) in rows {
        match result {
            Ok(date) => out.push_str(&format!("{symbol:<width$}  {date}\n")),
            Err(e) => out.push_str(&format!("{symbol:<width$}  error: {e}\n")),
        }
    }
    out
}
