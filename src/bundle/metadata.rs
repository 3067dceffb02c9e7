//! Asset metadata for the bundle.
//!
//! Combines the price history (first/last trade per contract), the vendor
//! names, the per-root terms from `meta.csv` and the expiration resolver into
//! one record per contract plus one per root symbol.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::domain::{
    ACTIVE_GRACE_DAYS, AUTO_CLOSE_OFFSET_DAYS, ContractSpec, ExpirationSource, FutureAsset, PriceBar, RootMeta,
    RootSymbolRecord,
};
use crate::error::{AppError, EXIT_DATA};
use crate::expiry::ExpirationResolver;
use crate::symbols::{SymbolForm, contract_month, root_symbol};

/// Vendor names known to be wrong, with their corrections.
const NAME_FIXES: [(&str, &str); 1] = [("NQU1999", "Nasdaq 100 Mini Futures, September 1999, NQU1999, CME")];

#[derive(Debug, Clone, Default)]
pub struct AssetMetadata {
    /// Sorted by (expiration date, expiration year, symbol); `sid` is the position.
    pub futures: Vec<FutureAsset>,
    pub root_symbols: Vec<RootSymbolRecord>,
    /// Contracts dropped because their root has no `meta.csv` row.
    pub skipped_without_meta: usize,
    pub by_source: HashMap<ExpirationSource, usize>,
}

pub fn gen_asset_metadata(
    bars: &[PriceBar],
    specs: &[ContractSpec],
    meta: &HashMap<String, RootMeta>,
    expiration: &ExpirationResolver,
    show_progress: bool,
) -> Result<AssetMetadata, AppError> {
    if show_progress {
        info!("Generating asset metadata");
    }

    let mut ranges: BTreeMap<&str, (NaiveDate, NaiveDate)> = BTreeMap::new();
    for bar in bars {
        ranges
            .entry(bar.symbol.as_str())
            .and_modify(|(start, end)| {
                *start = (*start).min(bar.date);
                *end = (*end).max(bar.date);
            })
            .or_insert((bar.date, bar.date));
    }
    let newest = ranges
        .values()
        .map(|(_, end)| *end)
        .max()
        .ok_or_else(|| AppError::new(EXIT_DATA, "No price data to build asset metadata from."))?;
    let cutoff = newest - Duration::days(ACTIVE_GRACE_DAYS);

    let names: HashMap<&str, &str> = specs.iter().map(|s| (s.code.as_str(), s.name.as_str())).collect();

    let mut out = AssetMetadata::default();
    for (symbol, (start, end)) in ranges {
        let parsed = root_symbol(symbol, SymbolForm::Long)
            .and_then(|root| contract_month(symbol).map(|(year, _)| (root, year)));
        let (raw_root, year) = match parsed {
            Ok(v) => v,
            Err(e) => {
                warn!("skipping {symbol}: {e}");
                continue;
            }
        };
        let Some(terms) = meta.get(raw_root) else {
            out.skipped_without_meta += 1;
            continue;
        };

        let active = end >= cutoff;
        let (expiration_date, source) = match expiration.resolve(symbol, end, active) {
            Ok(v) => v,
            Err(e) => {
                warn!("skipping {symbol}: {e}");
                continue;
            }
        };
        *out.by_source.entry(source).or_default() += 1;

        let auto_close_date = expiration_date - Duration::days(AUTO_CLOSE_OFFSET_DAYS);
        out.futures.push(FutureAsset {
            sid: 0,
            symbol: symbol.to_string(),
            root_symbol: bundle_root(raw_root),
            asset_name: asset_name(symbol, &names),
            start_date: start,
            end_date: end,
            first_traded: start,
            expiration_date,
            auto_close_date,
            notice_date: auto_close_date,
            expiration_year: year,
            exchange: terms.exchange.clone(),
            multiplier: terms.multiplier,
            tick_size: terms.tick_size,
            active,
            expiration_source: Some(source),
        });
    }

    out.futures.sort_by(|a, b| {
        a.expiration_date
            .cmp(&b.expiration_date)
            .then(a.expiration_year.cmp(&b.expiration_year))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    for (sid, asset) in out.futures.iter_mut().enumerate() {
        asset.sid = sid;
    }

    out.root_symbols = root_symbols(&out.futures, meta);
    Ok(out)
}

/// One record per root, in order of first appearance among `futures`.
pub fn root_symbols(futures: &[FutureAsset], meta: &HashMap<String, RootMeta>) -> Vec<RootSymbolRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for asset in futures {
        if !seen.insert(asset.root_symbol.as_str()) {
            continue;
        }
        let raw = asset.root_symbol.trim_start_matches('_');
        let Some(terms) = meta.get(raw) else {
            continue;
        };
        out.push(RootSymbolRecord {
            root_symbol_id: out.len(),
            root_symbol: asset.root_symbol.clone(),
            sector: format!("{}/{}", terms.sector, terms.sub_sector),
            exchange: terms.exchange.clone(),
            description: terms.name.clone(),
        });
    }
    out
}

/// Single-character roots get a `_` prefix: continuous futures need at
/// least two characters.
fn bundle_root(root: &str) -> String {
    if root.len() < 2 { format!("_{root}") } else { root.to_string() }
}

fn asset_name(symbol: &str, names: &HashMap<&str, &str>) -> String {
    if let Some((_, fixed)) = NAME_FIXES.iter().find(|(s, _)| *s == symbol) {
        return fixed.to_string();
    }
    names.get(symbol).map(|n| n.to_string()).unwrap_or_else(|| symbol.to_string())
}
