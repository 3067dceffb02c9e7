//! Contract expiration pipeline.
//!
//! - vendor spec filtering (`filter`)
//! - calendar page + spreadsheet scraping (`scraper`, `sheet`)
//! - merge, fallback and cache persistence (`resolver`)

pub mod filter;
pub mod resolver;
pub mod scraper;
pub mod sheet;

pub use filter::{FilterOptions, filter_specs};
pub use resolver::{BuildState, ExpirationResolver, ExpirationTable, ResolverSettings};
pub use scraper::{CalendarClient, CalendarScraper, HttpCalendarClient, HttpResponse, ScrapeStats, Throttle};
