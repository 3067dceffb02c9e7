//! Vendor specification filtering.
//!
//! Turns the raw vendor metadata table into the set of contracts that still
//! need an expiration lookup, each with its exchange calendar URL.

use std::collections::HashSet;

use chrono::Duration;
use tracing::{debug, warn};

use crate::domain::{ACTIVE_GRACE_DAYS, ActiveContract, ContractSpec};
use crate::symbols::{SymbolForm, contract_month, root_symbol, to_short_symbol};

/// Marks the dataset documentation rows in the vendor table.
pub const DOC_SENTINEL: &str = "Dataset description";
/// Marks index (non-tradable) instruments.
pub const INDEX_SENTINEL: &str = "INDEX";

const SPEC_PATH: &str = "contract_specifications";
const CALENDAR_PATH: &str = "product_calendar_futures";
/// Known bad path in vendor URLs and its correction.
const URL_FIXES: [(&str, &str); 1] = [("/mac-swap-futures/", "/swap-futures/")];

/// Optional restrictions on top of the activity filter.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub min_year: Option<i32>,
    /// Roots to keep; empty keeps everything.
    pub roots: Vec<String>,
}

/// Reduce raw specs to the active contracts.
pub fn filter_specs(specs: &[ContractSpec], options: &FilterOptions) -> Vec<ActiveContract> {
    let roots: HashSet<&str> = options.roots.iter().map(String::as_str).collect();
    let mut out = Vec::new();

    for spec in specs {
        if spec.description.contains(DOC_SENTINEL) || spec.code.contains(INDEX_SENTINEL) {
            continue;
        }

        let (root, exch_symbol, year) = match derive_symbols(&spec.code) {
            Ok(v) => v,
            Err(e) => {
                warn!(code = %spec.code, "skipping vendor row: {e}");
                continue;
            }
        };

        if options.min_year.is_some_and(|min| year < min) {
            continue;
        }
        if !roots.is_empty() && !roots.contains(root.as_str()) {
            continue;
        }

        out.push(ActiveContract {
            symbol: spec.code.clone(),
            root_symbol: root,
            calendar_url: calendar_url(&spec.description),
            exch_symbol,
            to_date: spec.to_date,
        });
    }

    let Some(newest) = out.iter().map(|c| c.to_date).max() else {
        return out;
    };
    let cutoff = newest - Duration::days(ACTIVE_GRACE_DAYS);
    let before = out.len();
    out.retain(|c| c.to_date >= cutoff);
    debug!(
        kept = out.len(),
        expired = before - out.len(),
        %cutoff,
        "filtered vendor specifications"
    );
    out
}

/// Extract the contract-spec URL from a vendor description and point it at
/// the product calendar instead.
pub fn calendar_url(description: &str) -> String {
    let tail = description.rsplit("<a href=").next().unwrap_or(description);
    let raw = tail.split(">http").next().unwrap_or(tail);
    let mut url = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .replace(SPEC_PATH, CALENDAR_PATH);
    for (bad, good) in URL_FIXES {
        url = url.replace(bad, good);
    }
    url
}

fn derive_symbols(code: &str) -> Result<(String, String, i32), crate::error::SymbolError> {
    let root = root_symbol(code, SymbolForm::Long)?.to_string();
    let short = to_short_symbol(code)?;
    let (year, _) = contract_month(code)?;
    Ok((root, short, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn spec(code: &str, to: (i32, u32, u32)) -> ContractSpec {
        ContractSpec {
            code: code.to_string(),
            name: format!("{code} futures"),
            description: "Contract specs: <a href=https://www.cmegroup.com/trading/equity-index/us-index/e-mini-sandp500_contract_specifications.html>https://www.cmegroup.com/...</a>"
                .to_string(),
            from_date: NaiveDate::from_ymd_opt(2018, 1, 2).unwrap(),
            to_date: NaiveDate::from_ymd_opt(to.0, to.1, to.2).unwrap(),
        }
    }

    #[test]
    fn keeps_only_contracts_within_grace_window() {
        let specs = vec![
            spec("ESH2020", (2020, 1, 10)),
            spec("ESM2020", (2020, 1, 9)),
            spec("ESU2019", (2019, 6, 1)),
        ];
        let out = filter_specs(&specs, &FilterOptions::default());
        let symbols: Vec<&str> = out.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ESH2020", "ESM2020"]);
    }

    #[test]
    fn drops_index_and_documentation_rows() {
        let mut doc = spec("ESZ2020", (2020, 1, 10));
        doc.description = "Dataset description for CME".to_string();
        let specs = vec![
            doc,
            spec("SPINDEX2020", (2020, 1, 10)),
            spec("ESH2020", (2020, 1, 10)),
        ];
        let out = filter_specs(&specs, &FilterOptions::default());
        assert_eq!(out.len(), 1);
        assert!(out.iter().all(|c| !c.symbol.contains(INDEX_SENTINEL)));
        assert!(out.iter().all(|c| !c.exch_symbol.contains(INDEX_SENTINEL)));
    }

    #[test]
    fn derives_root_and_exchange_symbol() {
        let out = filter_specs(&[spec("ESZ2024", (2024, 9, 30))], &FilterOptions::default());
        assert_eq!(out[0].root_symbol, "ES");
        assert_eq!(out[0].exch_symbol, "ESZ24");
        assert_eq!(
            out[0].calendar_url,
            "https://www.cmegroup.com/trading/equity-index/us-index/e-mini-sandp500_product_calendar_futures.html"
        );
    }

    #[test]
    fn rewrites_known_bad_swap_path() {
        let url = calendar_url(
            "<a href=\"https://www.cmegroup.com/trading/interest-rates/mac-swap-futures/x_contract_specifications.html\">https://x</a>",
        );
        assert_eq!(
            url,
            "https://www.cmegroup.com/trading/interest-rates/swap-futures/x_product_calendar_futures.html"
        );
    }

    #[test]
    fn malformed_codes_are_skipped() {
        let specs = vec![spec("ES", (2020, 1, 10)), spec("ESH2020", (2020, 1, 10))];
        let out = filter_specs(&specs, &FilterOptions::default());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn honours_min_year_and_root_list() {
        let specs = vec![
            spec("ESH2018", (2020, 1, 10)),
            spec("ESH2020", (2020, 1, 10)),
            spec("CLH2020", (2020, 1, 10)),
        ];
        let options = FilterOptions {
            min_year: Some(2019),
            roots: vec!["ES".to_string()],
        };
        let out = filter_specs(&specs, &options);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].symbol, "ESH2020");
    }
}
