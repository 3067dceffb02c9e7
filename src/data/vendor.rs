//! Quandl CME database integration.
//!
//! Two downloads: the contract metadata table (a zipped CSV) and the bulk
//! daily price archive (a zipped headerless CSV). Both are saved under the
//! data directory so offline runs can reuse them.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use rayon::prelude::*;
use reqwest::blocking::Client;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::domain::{ContractSpec, DEFAULT_DOWNLOAD_ATTEMPTS, PriceBar};
use crate::error::{AppError, EXIT_CONFIG, EXIT_DATA, EXIT_NETWORK};
use crate::expiry::filter::INDEX_SENTINEL;

const METADATA_URL: &str = "https://www.quandl.com/api/v3/databases/CME/metadata";
const BULK_URL: &str = "https://www.quandl.com/api/v3/databases/CME/data";

/// Longer symbols in the price archive are option codes.
const MAX_SYMBOL_LEN: usize = 8;

/// Bulk downloads are large; allow far more than the default request timeout.
const BULK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30 * 60);

/// Vendor credentials and download policy from the environment.
#[derive(Debug, Clone)]
pub struct VendorSettings {
    pub api_key: String,
    pub download_attempts: usize,
}

impl VendorSettings {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("QUANDL_API_KEY").map_err(|_| {
            AppError::new(
                EXIT_CONFIG,
                "Please set your QUANDL_API_KEY environment variable (or .env) and retry.",
            )
        })?;
        let download_attempts = match std::env::var("QUANDL_DOWNLOAD_ATTEMPTS") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                AppError::new(EXIT_CONFIG, format!("Invalid QUANDL_DOWNLOAD_ATTEMPTS '{raw}'."))
            })?,
            Err(_) => DEFAULT_DOWNLOAD_ATTEMPTS,
        };
        Ok(Self {
            api_key,
            download_attempts: download_attempts.max(1),
        })
    }
}

/// Result of parsing the bulk archive.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    /// Sorted by (symbol, date).
    pub bars: Vec<PriceBar>,
    pub rows_read: usize,
    /// Option codes and index rows.
    pub rows_dropped: usize,
    /// Lines that did not parse.
    pub rows_malformed: usize,
}

pub struct VendorClient {
    client: Client,
    settings: VendorSettings,
}

impl VendorClient {
    pub fn new(settings: VendorSettings) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(BULK_TIMEOUT)
            .build()
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    pub fn from_env() -> Result<Self, AppError> {
        Self::new(VendorSettings::from_env()?)
    }

    /// Download the contract metadata table, keep a copy at `save_to`.
    pub fn fetch_specs(&self, save_to: &Path, show_progress: bool) -> Result<Vec<ContractSpec>, AppError> {
        if show_progress {
            info!("Downloading metadata file from Quandl");
        }
        let bytes = self.download(METADATA_URL, &[])?;
        save_copy(save_to, &bytes);
        read_specs_archive(Cursor::new(bytes))
    }

    /// Download the bulk price archive, retrying up to the configured count.
    pub fn fetch_prices(&self, save_to: &Path, show_progress: bool) -> Result<PriceTable, AppError> {
        let attempts = self.settings.download_attempts;
        for attempt in 1..=attempts {
            if show_progress {
                info!(attempt, attempts, "Downloading CME price data");
            }
            let result = self
                .download(BULK_URL, &[("download_type", "complete")])
                .and_then(|bytes| {
                    save_copy(save_to, &bytes);
                    read_price_archive(Cursor::new(bytes), show_progress)
                });
            match result {
                Ok(table) => return Ok(table),
                Err(e) => warn!(attempt, "Exception raised reading Quandl data, retrying: {e}"),
            }
        }
        Err(AppError::new(
            EXIT_NETWORK,
            format!("Failed to download Quandl data after {attempts} attempts."),
        ))
    }

    fn download(&self, url: &str, extra: &[(&str, &str)]) -> Result<Vec<u8>, AppError> {
        let resp = self
            .client
            .get(url)
            .query(&[("api_key", self.settings.api_key.as_str())])
            .query(extra)
            .send()
            .map_err(|e| AppError::new(EXIT_NETWORK, format!("Quandl request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::new(
                EXIT_NETWORK,
                format!("Quandl request failed with status {}.", resp.status()),
            ));
        }
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| AppError::new(EXIT_NETWORK, format!("Failed to read Quandl response: {e}")))
    }
}

fn save_copy(path: &Path, bytes: &[u8]) {
    let result = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, bytes));
    if let Err(e) = result {
        warn!("Could not keep a copy at {}: {e}", path.display());
    }
}

/// Load the metadata table saved by an earlier run.
pub fn load_specs(path: &Path) -> Result<Vec<ContractSpec>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to open '{}': {e}", path.display())))?;
    read_specs_archive(file)
}

/// Load the price archive saved by an earlier run.
pub fn load_prices(path: &Path, show_progress: bool) -> Result<PriceTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to open '{}': {e}", path.display())))?;
    read_price_archive(file, show_progress)
}

fn single_entry<R: Read + Seek>(archive: R) -> Result<Vec<u8>, AppError> {
    let mut zip = ZipArchive::new(archive)
        .map_err(|e| AppError::new(EXIT_DATA, format!("Invalid vendor archive: {e}")))?;
    if zip.len() != 1 {
        return Err(AppError::new(
            EXIT_DATA,
            format!("Expected a single file in the vendor archive, found {}.", zip.len()),
        ));
    }
    let mut entry = zip
        .by_index(0)
        .map_err(|e| AppError::new(EXIT_DATA, format!("Invalid vendor archive: {e}")))?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| AppError::new(EXIT_DATA, format!("Failed to unpack vendor archive: {e}")))?;
    Ok(buf)
}

/// Parse a zipped metadata table (`code,name,description,refreshed_at,from_date,to_date`).
pub fn read_specs_archive<R: Read + Seek>(archive: R) -> Result<Vec<ContractSpec>, AppError> {
    let csv_bytes = single_entry(archive)?;
    parse_specs_csv(&csv_bytes)
}

pub fn parse_specs_csv(bytes: &[u8]) -> Result<Vec<ContractSpec>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut specs = Vec::new();
    for (idx, result) in reader.deserialize::<ContractSpec>().enumerate() {
        match result {
            Ok(spec) => specs.push(spec),
            // +2: header line, 1-based.
            Err(e) => warn!(line = idx + 2, "skipping malformed metadata row: {e}"),
        }
    }
    if specs.is_empty() {
        return Err(AppError::new(EXIT_DATA, "Vendor metadata table contains no contracts."));
    }
    Ok(specs)
}

/// Parse a zipped bulk price file.
///
/// Columns are fixed and unnamed: symbol, date, open, high, low, last, change,
/// settle, volume, open interest, then two placeholders that only option rows
/// fill.
pub fn read_price_archive<R: Read + Seek>(archive: R, show_progress: bool) -> Result<PriceTable, AppError> {
    let csv_bytes = single_entry(archive)?;
    if show_progress {
        info!("Parsing raw data");
    }
    let table = parse_price_csv(&csv_bytes);
    if table.bars.is_empty() {
        return Err(AppError::new(EXIT_DATA, "Vendor price archive contains no usable rows."));
    }
    Ok(table)
}

pub fn parse_price_csv(bytes: &[u8]) -> PriceTable {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut table = PriceTable::default();
    for result in reader.records() {
        table.rows_read += 1;
        let Ok(record) = result else {
            table.rows_malformed += 1;
            continue;
        };
        let symbol = record.get(0).unwrap_or_default();
        if symbol.len() > MAX_SYMBOL_LEN || symbol.contains(INDEX_SENTINEL) {
            table.rows_dropped += 1;
            continue;
        }
        match parse_price_record(&record) {
            Some(bar) => table.bars.push(bar),
            None => table.rows_malformed += 1,
        }
    }

    table
        .bars
        .par_sort_unstable_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));
    table
}

fn parse_price_record(record: &csv::StringRecord) -> Option<PriceBar> {
    let symbol = record.get(0).filter(|s| !s.is_empty())?.to_string();
    let date = chrono::NaiveDate::parse_from_str(record.get(1)?, "%Y-%m-%d").ok()?;
    let num = |i: usize| record.get(i).and_then(|v| v.parse::<f64>().ok()).filter(|v| v.is_finite());
    Some(PriceBar {
        symbol,
        date,
        open: num(2),
        high: num(3),
        low: num(4),
        close: num(5),
        change: num(6),
        settle: num(7),
        volume: num(8),
        open_interest: num(9),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    use chrono::NaiveDate;
    use zip::write::SimpleFileOptions;

    pub(crate) fn zipped(files: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            for (name, body) in files {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn price_rows_filter_options_and_indexes() {
        let body = "\
ESZ2024,2024-10-01,5700,5750,5690,5740,10,5741,120000,2000000,,
ESZ2024,2024-09-30,5690,5710,5680,5700,,5701,110000,1990000,,
ESZ2024C5000,2024-09-30,1,1,1,1,,1,1,1,x,y
SPINDEX,2024-09-30,1,1,1,1,,1,1,1,,
CLZ2024,not-a-date,1,1,1,1,,1,1,1,,
";
        let table = parse_price_csv(body.as_bytes());
        assert_eq!(table.rows_read, 5);
        assert_eq!(table.rows_dropped, 2);
        assert_eq!(table.rows_malformed, 1);
        assert_eq!(table.bars.len(), 2);
        assert_eq!(table.bars[0].date, NaiveDate::from_ymd_opt(2024, 9, 30).unwrap());
        assert_eq!(table.bars[0].change, None);
        assert_eq!(table.bars[1].settle, Some(5741.0));
    }

    #[test]
    fn price_archive_must_hold_one_file() {
        let bytes = zipped(&[("a.csv", "x"), ("b.csv", "y")]);
        let err = read_price_archive(Cursor::new(bytes), false).unwrap_err();
        assert!(err.message().contains("single file"));
    }

    #[test]
    fn specs_archive_parses_dates() {
        let body = "\
code,name,description,refreshed_at,from_date,to_date
ESZ2024,\"E-mini S&P 500 Futures, December 2024, ESZ2024, CME\",<a href=https://x>https://x</a>,2024-10-02 01:00:00,2023-09-15,2024-10-01
BAD,broken,,,,
";
        let specs = read_specs_archive(Cursor::new(zipped(&[("CME_metadata.csv", body)]))).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].to_date, NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert!(specs[0].name.starts_with("E-mini"));
    }

    #[test]
    fn saved_archives_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CME_price_data.zip");
        std::fs::write(&path, zipped(&[("CME.csv", "GCZ2024,2024-10-01,1,2,0.5,1.5,,1.5,10,20,,\n")])).unwrap();
        let table = load_prices(&path, false).unwrap();
        assert_eq!(table.bars.len(), 1);
        assert_eq!(table.bars[0].symbol, "GCZ2024");
    }
}
