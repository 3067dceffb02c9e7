//! Expiration date resolution.
//!
//! The resolver owns the symbol -> expiration table. A downloading build
//! filters the vendor specs, scrapes one calendar per root, joins the scraped
//! rows onto the active contracts and persists the result; an offline build
//! loads the table persisted by an earlier run. Lookups fall back to the third
//! Friday of the contract month for symbols the table does not know.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::domain::{
    ActiveContract, CalendarRow, ContractSpec, ExpirationEntry, ExpirationSource, THROTTLE_EVERY, THROTTLE_PAUSE,
};
use crate::error::{AppError, EXIT_CONFIG, SymbolError};
use crate::expiry::filter::{FilterOptions, filter_specs};
use crate::expiry::scraper::{CalendarClient, CalendarScraper, ScrapeStats, Throttle};
use crate::symbols::{third_friday, to_short_symbol};

/// Symbol -> expiration date, keyed by long-form code and also reachable by
/// the short exchange form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirationTable {
    by_symbol: BTreeMap<String, NaiveDate>,
    by_short: HashMap<String, NaiveDate>,
}

impl ExpirationTable {
    /// Build from entries; the first entry for a symbol wins.
    pub fn from_entries(entries: impl IntoIterator<Item = ExpirationEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            if table.by_symbol.contains_key(&entry.symbol) {
                continue;
            }
            if let Ok(short) = to_short_symbol(&entry.symbol) {
                table.by_short.entry(short).or_insert(entry.expiration_date);
            }
            table.by_symbol.insert(entry.symbol, entry.expiration_date);
        }
        table
    }

    pub fn get(&self, symbol: &str) -> Option<NaiveDate> {
        self.by_symbol
            .get(symbol)
            .or_else(|| self.by_short.get(symbol))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = ExpirationEntry> + '_ {
        self.by_symbol.iter().map(|(symbol, date)| ExpirationEntry {
            symbol: symbol.clone(),
            expiration_date: *date,
        })
    }

    /// Load a cache file written by `save`.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Err(AppError::new(
                EXIT_CONFIG,
                format!(
                    "Expiration cache '{}' not found. Run once with downloads enabled to create it.",
                    path.display()
                ),
            ));
        }
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to open '{}': {e}", path.display())))?;

        let mut entries = Vec::new();
        for (idx, result) in reader.deserialize::<ExpirationEntry>().enumerate() {
            let entry = result.map_err(|e| {
                AppError::new(
                    EXIT_CONFIG,
                    format!("Invalid expiration cache '{}' at line {}: {e}", path.display(), idx + 2),
                )
            })?;
            entries.push(entry);
        }
        Ok(Self::from_entries(entries))
    }

    /// Write the table as `symbol,expiration_date`.
    ///
    /// The file is written next to its destination and renamed into place, so
    /// an interrupted save leaves the previous cache intact.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer
            .write_record(["symbol", "expiration_date"])
            .map_err(std::io::Error::other)?;
        for entry in self.entries() {
            writer.serialize(entry).map_err(std::io::Error::other)?;
        }
        let bytes = writer.into_inner().map_err(|e| std::io::Error::other(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("csv.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)
    }
}

/// Where a `build` call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Init,
    Filtering,
    Fetching,
    Merging,
    Persisting,
    Ready,
    /// The exchange banned us mid-run; the table is not usable.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub cache_path: PathBuf,
    /// `true`: scrape the exchange; `false`: load `cache_path`.
    pub download: bool,
    pub show_progress: bool,
    pub filter: FilterOptions,
    pub throttle_every: usize,
    pub throttle_pause: Duration,
}

impl ResolverSettings {
    pub fn new(cache_path: impl Into<PathBuf>, download: bool) -> Self {
        Self {
            cache_path: cache_path.into(),
            download,
            show_progress: false,
            filter: FilterOptions::default(),
            throttle_every: THROTTLE_EVERY,
            throttle_pause: THROTTLE_PAUSE,
        }
    }
}

pub struct ExpirationResolver {
    settings: ResolverSettings,
    table: ExpirationTable,
    state: BuildState,
    stats: Option<ScrapeStats>,
}

impl ExpirationResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            settings,
            table: ExpirationTable::default(),
            state: BuildState::Init,
            stats: None,
        }
    }

    /// Produce the expiration table, either by scraping or from the cache.
    ///
    /// A rate ban aborts the build before anything is merged or saved.
    pub fn build<C: CalendarClient>(&mut self, raw_specs: &[ContractSpec], client: &C) -> Result<(), AppError> {
        if !self.settings.download {
            info!(
                "Reading expiration dates from {}. Remove it or enable downloads to refresh from the exchange.",
                self.settings.cache_path.display()
            );
            return self.load_cache();
        }

        self.state = BuildState::Filtering;
        let active = filter_specs(raw_specs, &self.settings.filter);
        let reference_year = active
            .iter()
            .map(|c| c.to_date.year())
            .max()
            .unwrap_or_else(|| Local::now().year());

        self.state = BuildState::Fetching;
        if self.settings.show_progress {
            info!(contracts = active.len(), "Downloading contract expiration dates from CME website");
        }
        let rows = match self.fetch_calendars(&active, client, reference_year) {
            Ok(rows) => rows,
            Err(e) => {
                self.state = BuildState::Aborted;
                return Err(e);
            }
        };

        self.state = BuildState::Merging;
        self.table = merge(&active, &rows);
        debug!(entries = self.table.len(), scraped_rows = rows.len(), "merged calendar data");

        self.state = BuildState::Persisting;
        if self.table.is_empty() {
            warn!(
                "No calendar data matched an active contract; keeping the existing {}",
                self.settings.cache_path.display()
            );
            self.table = self.previous_table();
        } else {
            self.persist();
        }

        self.state = BuildState::Ready;
        Ok(())
    }

    fn fetch_calendars<C: CalendarClient>(
        &mut self,
        active: &[ActiveContract],
        client: &C,
        reference_year: i32,
    ) -> Result<Vec<CalendarRow>, AppError> {
        let throttle = Throttle::new(self.settings.throttle_every, self.settings.throttle_pause);
        let mut scraper = CalendarScraper::new(client, throttle, reference_year);
        let mut rows = Vec::new();

        for contract in active {
            match scraper.fetch(&contract.root_symbol, &contract.calendar_url) {
                Ok(Some(fetched)) => {
                    if self.settings.show_progress {
                        info!(root = %contract.root_symbol, rows = fetched.len(), "fetched calendar");
                    }
                    rows.extend(fetched);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!("{e}");
                    self.stats = Some(scraper.stats().clone());
                    return Err(e.into());
                }
                Err(e) => warn!("{e}"),
            }
        }

        self.stats = Some(scraper.stats().clone());
        Ok(rows)
    }

    /// Serve lookups from the cache file without scraping.
    ///
    /// A missing cache file is a configuration error.
    pub fn load_cache(&mut self) -> Result<(), AppError> {
        self.table = ExpirationTable::load(&self.settings.cache_path)?;
        self.state = BuildState::Ready;
        Ok(())
    }

    /// The cache left by an earlier run, or an empty table if there is none.
    fn previous_table(&self) -> ExpirationTable {
        let path = &self.settings.cache_path;
        if !path.exists() {
            return ExpirationTable::default();
        }
        ExpirationTable::load(path).unwrap_or_else(|e| {
            warn!("{e}");
            ExpirationTable::default()
        })
    }

    fn persist(&self) {
        let path = &self.settings.cache_path;
        match self.table.save(path) {
            Ok(()) => debug!(entries = self.table.len(), path = %path.display(), "saved expiration dates"),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => error!(
                "{} is open in another program; new expiration dates will not be saved to disk",
                path.display()
            ),
            Err(e) => error!("Failed to save expiration dates to {}: {e}", path.display()),
        }
    }

    /// Expiration date of `symbol` (long or short form), falling back to the
    /// third Friday of its contract month.
    pub fn lookup(&self, symbol: &str) -> Result<NaiveDate, SymbolError> {
        match self.table.get(symbol) {
            Some(date) => Ok(date),
            None => third_friday(symbol),
        }
    }

    /// Expiration of a contract given what the price data says about it.
    ///
    /// Scraped dates win; an expired contract otherwise expires on its last
    /// observed date; an active one on the third Friday of its month.
    pub fn resolve(
        &self,
        symbol: &str,
        last_observed: NaiveDate,
        active: bool,
    ) -> Result<(NaiveDate, ExpirationSource), SymbolError> {
        if let Some(date) = self.table.get(symbol) {
            return Ok((date, ExpirationSource::Scraped));
        }
        if !active {
            return Ok((last_observed, ExpirationSource::VendorEndDate));
        }
        Ok((third_friday(symbol)?, ExpirationSource::ThirdFriday))
    }

    pub fn table(&self) -> &ExpirationTable {
        &self.table
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Scrape counters of the last downloading build.
    pub fn stats(&self) -> Option<&ScrapeStats> {
        self.stats.as_ref()
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }
}

/// Join scraped rows onto active contracts by exchange symbol.
fn merge(active: &[ActiveContract], rows: &[CalendarRow]) -> ExpirationTable {
    let mut by_code: HashMap<&str, NaiveDate> = HashMap::new();
    for row in rows {
        by_code.entry(row.product_code.as_str()).or_insert(row.last_trade_date);
    }

    ExpirationTable::from_entries(active.iter().filter_map(|c| {
        by_code.get(c.exch_symbol.as_str()).map(|date| ExpirationEntry {
            symbol: c.symbol.clone(),
            expiration_date: *date,
        })
    }))
}
