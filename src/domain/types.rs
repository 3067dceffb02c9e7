//! Shared domain types.
//!
//! Records are plain named-field structs so they can be read from vendor CSV
//! files, carried through the pipeline and written back out without any
//! positional column handling.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Contracts whose data ends more than this many days before the newest
/// observation are considered expired.
pub const ACTIVE_GRACE_DAYS: i64 = 2;

/// Number of calendar fetches between two throttle pauses.
pub const THROTTLE_EVERY: usize = 250;

/// Length of a throttle pause.
pub const THROTTLE_PAUSE: Duration = Duration::from_secs(10);

/// Per-request timeout for every HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts for the vendor bulk download.
pub const DEFAULT_DOWNLOAD_ATTEMPTS: usize = 5;

/// Auto-close and notice dates sit this many days before expiration.
pub const AUTO_CLOSE_OFFSET_DAYS: i64 = 2;

/// One contract as published in the vendor metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

/// A contract that survived the specification filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveContract {
    /// Long-form vendor code, e.g. `ESZ2024`.
    pub symbol: String,
    pub root_symbol: String,
    pub calendar_url: String,
    /// Short-form exchange code, e.g. `ESZ24`.
    pub exch_symbol: String,
    pub to_date: NaiveDate,
}

/// One row of an exchange expiration spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRow {
    /// Short-form code rebuilt from the canonical root.
    pub product_code: String,
    pub last_trade_date: NaiveDate,
}

/// A resolved expiration, as persisted in the cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationEntry {
    pub symbol: String,
    pub expiration_date: NaiveDate,
}

/// Where a resolved expiration date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationSource {
    /// Exchange calendar (or the cache of a previous scrape).
    Scraped,
    /// Last date the vendor has data for an expired contract.
    VendorEndDate,
    /// Calculated third Friday of the contract month.
    ThirdFriday,
}

impl ExpirationSource {
    pub const ALL: [ExpirationSource; 3] = [
        ExpirationSource::Scraped,
        ExpirationSource::VendorEndDate,
        ExpirationSource::ThirdFriday,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ExpirationSource::Scraped => "exchange calendar",
            ExpirationSource::VendorEndDate => "vendor end date",
            ExpirationSource::ThirdFriday => "third friday",
        }
    }
}

/// One daily bar from the vendor bulk archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub change: Option<f64>,
    pub settle: Option<f64>,
    pub volume: Option<f64>,
    pub open_interest: Option<f64>,
}

/// Per-root contract terms from the hand-maintained `meta.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootMeta {
    pub root_symbol: String,
    pub name: String,
    pub exchange: String,
    pub multiplier: f64,
    pub tick_size: f64,
    pub sector: String,
    pub sub_sector: String,
}

/// Bundle record for one futures contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureAsset {
    pub sid: usize,
    pub symbol: String,
    pub root_symbol: String,
    pub asset_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub first_traded: NaiveDate,
    pub expiration_date: NaiveDate,
    pub auto_close_date: NaiveDate,
    pub notice_date: NaiveDate,
    pub expiration_year: i32,
    pub exchange: String,
    pub multiplier: f64,
    pub tick_size: f64,
    pub active: bool,
    #[serde(skip)]
    pub expiration_source: Option<ExpirationSource>,
}

/// Bundle record for one root symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSymbolRecord {
    pub root_symbol_id: usize,
    pub root_symbol: String,
    pub sector: String,
    pub exchange: String,
    pub description: String,
}

/// Resolved settings for an ingest run (CLI + environment).
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Where vendor files, `meta.csv` and the expiration cache live.
    pub data_dir: PathBuf,
    /// Where the bundle is written.
    pub out_dir: PathBuf,
    /// Where the per-run error log is created.
    pub log_dir: PathBuf,
    /// `true`: fetch fresh data from the vendor and the exchange.
    pub download: bool,
    pub show_progress: bool,
    /// Drop contracts whose year is below this.
    pub min_year: Option<i32>,
    /// Restrict the run to these roots (empty = all).
    pub contracts: Vec<String>,
}

impl IngestConfig {
    pub fn expiration_cache(&self) -> PathBuf {
        self.data_dir.join("expiration_dates.csv")
    }

    pub fn specs_archive(&self) -> PathBuf {
        self.data_dir.join("CME_metadata.zip")
    }

    pub fn price_archive(&self) -> PathBuf {
        self.data_dir.join("CME_price_data.zip")
    }

    pub fn meta_file(&self) -> PathBuf {
        self.data_dir.join("meta.csv")
    }
}
