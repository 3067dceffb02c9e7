//! Bundle output.
//!
//! The pipeline hands finished tables to a `BundleWriter`; the CSV writer lays
//! them out as
//!
//! ```text
//! <out_dir>/futures.csv
//! <out_dir>/root_symbols.csv
//! <out_dir>/daily/<symbol>.csv
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{FutureAsset, PriceBar, RootSymbolRecord};
use crate::error::{AppError, EXIT_CONFIG};

pub trait BundleWriter {
    fn write_assets(&mut self, futures: &[FutureAsset], roots: &[RootSymbolRecord]) -> Result<(), AppError>;

    /// `bars` all belong to `symbol` and are in date order.
    fn write_daily_bars(&mut self, symbol: &str, bars: &[PriceBar]) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct CsvBundleWriter {
    out_dir: PathBuf,
    files_written: usize,
}

#[derive(Serialize)]
struct DailyRow {
    date: NaiveDate,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    settle: Option<f64>,
    volume: Option<f64>,
    open_interest: Option<f64>,
}

impl From<&PriceBar> for DailyRow {
    fn from(bar: &PriceBar) -> Self {
        Self {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            settle: bar.settle,
            volume: bar.volume,
            open_interest: bar.open_interest,
        }
    }
}

impl CsvBundleWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let out_dir = out_dir.into();
        let daily = out_dir.join("daily");
        std::fs::create_dir_all(&daily)
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to create '{}': {e}", daily.display())))?;
        Ok(Self {
            out_dir,
            files_written: 0,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn files_written(&self) -> usize {
        self.files_written
    }

    fn write_table<T: Serialize>(&mut self, path: &Path, rows: impl IntoIterator<Item = T>) -> Result<(), AppError> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to create '{}': {e}", path.display())))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to write '{}': {e}", path.display())))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to write '{}': {e}", path.display())))?;
        self.files_written += 1;
        Ok(())
    }
}

impl BundleWriter for CsvBundleWriter {
    fn write_assets(&mut self, futures: &[FutureAsset], roots: &[RootSymbolRecord]) -> Result<(), AppError> {
        let futures_path = self.out_dir.join("futures.csv");
        self.write_table(&futures_path, futures)?;
        let roots_path = self.out_dir.join("root_symbols.csv");
        self.write_table(&roots_path, roots)
    }

    fn write_daily_bars(&mut self, symbol: &str, bars: &[PriceBar]) -> Result<(), AppError> {
        let path = self.out_dir.join("daily").join(format!("{symbol}.csv"));
        self.write_table(&path, bars.iter().map(DailyRow::from))
    }
}

/// Feed `bars` (sorted by symbol, then date) to `writer` one symbol at a time.
///
/// Only symbols in `keep` are written. Returns the number of symbols written.
pub fn write_all_bars<W: BundleWriter + ?Sized>(
    writer: &mut W,
    bars: &[PriceBar],
    keep: &std::collections::HashSet<&str>,
) -> Result<usize, AppError> {
    let mut written = 0;
    for group in bars.chunk_by(|a, b| a.symbol == b.symbol) {
        let symbol = group[0].symbol.as_str();
        if !keep.contains(symbol) {
            continue;
        }
        writer.write_daily_bars(symbol, group)?;
        written += 1;
    }
    Ok(written)
}
