//! Shared ingest workflow used by the `ingest` and `expirations` commands.
//!
//! vendor specs -> expiration table -> vendor prices -> root terms ->
//! asset metadata -> bundle files
//!
//! The network-facing pieces (`VendorClient`, `HttpCalendarClient`) are built
//! in `run_*`; everything after them takes plain data or a trait object so it
//! can be driven from tests.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::bundle::{BundleWriter, CsvBundleWriter, gen_asset_metadata, load_root_meta, write_all_bars};
use crate::data::{PriceTable, VendorClient, load_prices, load_specs};
use crate::domain::{ContractSpec, IngestConfig, RootMeta};
use crate::error::{AppError, EXIT_CONFIG};
use crate::expiry::{CalendarClient, ExpirationResolver, FilterOptions, HttpCalendarClient, ResolverSettings};
use crate::report::{ExpirationSummary, IngestSummary};
use crate::symbols::{SymbolForm, root_symbol};

/// Prerender service for the exchange calendar pages.
pub const RENDER_URL_VAR: &str = "CALENDAR_RENDER_URL";

pub fn resolver_settings(config: &IngestConfig) -> ResolverSettings {
    let mut settings = ResolverSettings::new(config.expiration_cache(), config.download);
    settings.show_progress = config.show_progress;
    settings.filter = FilterOptions {
        min_year: config.min_year,
        roots: config.contracts.clone(),
    };
    settings
}

pub fn calendar_client_from_env(download: bool) -> Result<HttpCalendarClient, AppError> {
    dotenvy::dotenv().ok();
    calendar_client(std::env::var(RENDER_URL_VAR).ok(), download)
}

/// The calendar download link is injected by script, so scraping needs a
/// rendering endpoint. Offline runs never touch the client.
pub fn calendar_client(endpoint: Option<String>, download: bool) -> Result<HttpCalendarClient, AppError> {
    let endpoint = endpoint.filter(|v| !v.trim().is_empty());
    if download && endpoint.is_none() {
        return Err(AppError::new(
            EXIT_CONFIG,
            format!(
                "Please set {RENDER_URL_VAR} to a page rendering service (called as GET <url>?url=<page>) \
                 or run with --offline to reuse the cached expiration dates."
            ),
        ));
    }
    HttpCalendarClient::new(endpoint)
}

/// Build the expiration table for `specs` through `client`.
pub fn build_expirations<C: CalendarClient>(
    config: &IngestConfig,
    specs: &[ContractSpec],
    client: &C,
) -> Result<ExpirationResolver, AppError> {
    let mut resolver = ExpirationResolver::new(resolver_settings(config));
    resolver.build(specs, client)?;
    Ok(resolver)
}

pub fn expiration_summary(resolver: &ExpirationResolver) -> ExpirationSummary {
    ExpirationSummary {
        cache_path: resolver.settings().cache_path.display().to_string(),
        downloaded: resolver.settings().download,
        state: resolver.state(),
        entries: resolver.table().len(),
        scrape: resolver.stats().cloned(),
    }
}

/// `fbundle expirations`: refresh (or load) the expiration table only.
pub fn run_expirations(config: &IngestConfig) -> Result<ExpirationSummary, AppError> {
    let client = calendar_client_from_env(config.download)?;
    let specs = if config.download {
        let path = config.specs_archive();
        VendorClient::from_env()?.fetch_specs(&path, config.show_progress)?
    } else {
        Vec::new()
    };
    let resolver = build_expirations(config, &specs, &client)?;
    Ok(expiration_summary(&resolver))
}

/// `fbundle ingest`: the full bundle build.
pub fn run_ingest(config: &IngestConfig) -> Result<IngestSummary, AppError> {
    let client = calendar_client_from_env(config.download)?;
    let vendor = if config.download {
        Some(VendorClient::from_env()?)
    } else {
        None
    };

    let specs = match &vendor {
        Some(v) => v.fetch_specs(&config.specs_archive(), config.show_progress)?,
        None => load_specs(&config.specs_archive())?,
    };

    let resolver = build_expirations(config, &specs, &client)?;

    let prices = match &vendor {
        Some(v) => v.fetch_prices(&config.price_archive(), config.show_progress)?,
        None => load_prices(&config.price_archive(), config.show_progress)?,
    };
    let meta = load_root_meta(&config.meta_file())?;

    let mut writer = CsvBundleWriter::new(&config.out_dir)?;
    assemble_bundle(config, &specs, prices, &meta, &resolver, &mut writer)
}

/// Everything after the downloads: metadata generation and output.
pub fn assemble_bundle<W: BundleWriter + ?Sized>(
    config: &IngestConfig,
    specs: &[ContractSpec],
    mut prices: PriceTable,
    meta: &HashMap<String, RootMeta>,
    resolver: &ExpirationResolver,
    writer: &mut W,
) -> Result<IngestSummary, AppError> {
    if !config.contracts.is_empty() {
        let before = prices.bars.len();
        retain_roots(&mut prices, &config.contracts);
        info!(kept = prices.bars.len(), dropped = before - prices.bars.len(), "restricted price data to requested roots");
    }

    let assets = gen_asset_metadata(&prices.bars, specs, meta, resolver, config.show_progress)?;
    if assets.skipped_without_meta > 0 {
        warn!(
            contracts = assets.skipped_without_meta,
            "contracts dropped: root symbol missing from {}",
            config.meta_file().display()
        );
    }

    writer.write_assets(&assets.futures, &assets.root_symbols)?;
    let keep: HashSet<&str> = assets.futures.iter().map(|a| a.symbol.as_str()).collect();
    let daily_files = write_all_bars(writer, &prices.bars, &keep)?;
    if config.show_progress {
        info!(contracts = assets.futures.len(), daily_files, "bundle written");
    }

    Ok(IngestSummary {
        expirations: expiration_summary(resolver),
        specs: specs.len(),
        rows_read: prices.rows_read,
        rows_dropped: prices.rows_dropped,
        rows_malformed: prices.rows_malformed,
        contracts: assets.futures.len(),
        roots: assets.root_symbols.len(),
        skipped_without_meta: assets.skipped_without_meta,
        by_source: assets.by_source,
        daily_files,
        out_dir: config.out_dir.display().to_string(),
    })
}

fn retain_roots(prices: &mut PriceTable, roots: &[String]) {
    let roots: HashSet<&str> = roots.iter().map(String::as_str).collect();
    prices.bars.retain(|bar| {
        root_symbol(&bar.symbol, SymbolForm::Long).is_ok_and(|root| roots.contains(root))
    });
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{ExpirationSource, PriceBar};
    use crate::expiry::scraper::tests::{FakeExchange, sheet};

    const ES_URL: &str = "https://www.cmegroup.com/trading/equity-index/us-index/e-mini-sandp500_product_calendar_futures.html";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(dir: &std::path::Path, download: bool) -> IngestConfig {
        IngestConfig {
            data_dir: dir.to_path_buf(),
            out_dir: dir.join("futures"),
            log_dir: PathBuf::from("."),
            download,
            show_progress: false,
            min_year: None,
            contracts: Vec::new(),
        }
    }

    fn spec(code: &str, to: NaiveDate) -> ContractSpec {
        ContractSpec {
            code: code.to_string(),
            name: format!("{code} future"),
            description: "<a href=https://www.cmegroup.com/trading/equity-index/us-index/e-mini-sandp500_contract_specifications.html>https://www.cmegroup.com/...</a>"
                .to_string(),
            from_date: date(2023, 1, 3),
            to_date: to,
        }
    }

    fn bar(symbol: &str, d: NaiveDate) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date: d,
            open: None,
            high: None,
            low: None,
            close: None,
            change: None,
            settle: Some(1.0),
            volume: None,
            open_interest: None,
        }
    }

    fn meta() -> HashMap<String, RootMeta> {
        HashMap::from([(
            "ES".to_string(),
            RootMeta {
                root_symbol: "ES".to_string(),
                name: "E-mini S&P 500".to_string(),
                exchange: "CME".to_string(),
                multiplier: 50.0,
                tick_size: 0.25,
                sector: "equity".to_string(),
                sub_sector: "index".to_string(),
            },
        )])
    }

    #[test]
    fn scrape_then_assemble_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), true);
        let specs = vec![spec("ESZ2024", date(2024, 10, 1)), spec("ESH2025", date(2024, 10, 1))];
        let exchange = FakeExchange::default().with_calendar(
            ES_URL,
            "/files/es.xls",
            &sheet("Dec 2024,ESZ4,12/20/2024\n"),
        );

        let resolver = build_expirations(&cfg, &specs, &exchange).unwrap();
        assert!(cfg.expiration_cache().exists());

        let prices = PriceTable {
            bars: vec![
                bar("CLZ2024", date(2024, 10, 1)),
                bar("ESH2025", date(2024, 9, 30)),
                bar("ESH2025", date(2024, 10, 1)),
                bar("ESZ2024", date(2024, 10, 1)),
            ],
            rows_read: 4,
            ..PriceTable::default()
        };
        let mut writer = CsvBundleWriter::new(&cfg.out_dir).unwrap();
        let summary = assemble_bundle(&cfg, &specs, prices, &meta(), &resolver, &mut writer).unwrap();

        assert_eq!(summary.contracts, 2);
        assert_eq!(summary.skipped_without_meta, 1);
        assert_eq!(summary.daily_files, 2);
        assert_eq!(summary.by_source[&ExpirationSource::Scraped], 1);
        assert_eq!(summary.by_source[&ExpirationSource::ThirdFriday], 1);
        assert_eq!(summary.expirations.entries, 1);
        assert!(cfg.out_dir.join("daily/ESZ2024.csv").exists());
        assert!(!cfg.out_dir.join("daily/CLZ2024.csv").exists());

        let futures = std::fs::read_to_string(cfg.out_dir.join("futures.csv")).unwrap();
        assert!(futures.contains("ESZ2024,ES,ESZ2024 future,2024-10-01,2024-10-01,2024-10-01,2024-12-20"));
    }

    #[test]
    fn scraping_requires_a_render_endpoint() {
        let err = calendar_client(None, true).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_CONFIG);
        assert!(err.message().contains(RENDER_URL_VAR));
        assert_eq!(calendar_client(Some("  ".to_string()), true).unwrap_err().exit_code(), EXIT_CONFIG);

        assert!(calendar_client(None, false).is_ok());
        assert!(calendar_client(Some("http://localhost:3000/render".to_string()), true).is_ok());
    }

    #[test]
    fn offline_run_reuses_cache_and_contract_filter() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![spec("ESZ2024", date(2024, 10, 1))];
        let exchange = FakeExchange::default().with_calendar(
            ES_URL,
            "/files/es.xls",
            &sheet("Dec 2024,ESZ4,12/20/2024\n"),
        );
        build_expirations(&config(dir.path(), true), &specs, &exchange).unwrap();

        let mut cfg = config(dir.path(), false);
        cfg.contracts = vec!["CL".to_string()];
        let offline = FakeExchange::default();
        let resolver = build_expirations(&cfg, &[], &offline).unwrap();
        assert!(offline.requests.borrow().is_empty());
        assert_eq!(resolver.lookup("ESZ24").unwrap(), date(2024, 12, 20));

        let prices = PriceTable {
            bars: vec![bar("ESZ2024", date(2024, 10, 1))],
            ..PriceTable::default()
        };
        let mut writer = CsvBundleWriter::new(&cfg.out_dir).unwrap();
        let err = assemble_bundle(&cfg, &specs, prices, &meta(), &resolver, &mut writer).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_DATA);
    }
}
