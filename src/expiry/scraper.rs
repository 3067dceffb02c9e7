//! CME product calendar scraping.
//!
//! One calendar page serves every contract year of a root, so the scraper
//! keeps a per-run set of roots already fetched. Requests are strictly
//! sequential and paced by a counter-based throttle.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::domain::{CalendarRow, HTTP_TIMEOUT, THROTTLE_EVERY, THROTTLE_PAUSE};
use crate::error::{AppError, EXIT_CONFIG, FetchError};
use crate::expiry::sheet::{calendar_rows, read_grid};

/// CSS class of the "download Excel" button on calendar pages.
pub const DOWNLOAD_BUTTON_SELECTOR: &str = ".cmeButtonDownloadExcel";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access needed by the scraper.
///
/// `get_page` must return the page after client-side rendering: the download
/// link is injected by script and is absent from the raw markup.
pub trait CalendarClient {
    fn get_page(&self, url: &str) -> Result<HttpResponse, String>;
    fn get_file(&self, url: &str) -> Result<HttpResponse, String>;
}

/// Blocking HTTP client for the exchange website.
///
/// Pages are requested through `render_endpoint` (a prerendering service
/// called as `GET {endpoint}?url={page}`) when one is configured, otherwise
/// directly. Without an endpoint only already-rendered pages expose the
/// download link.
#[derive(Debug)]
pub struct HttpCalendarClient {
    client: Client,
    render_endpoint: Option<String>,
}

impl HttpCalendarClient {
    pub fn new(render_endpoint: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            render_endpoint,
        })
    }

    fn send(&self, req: reqwest::blocking::RequestBuilder) -> Result<HttpResponse, String> {
        let resp = req.send().map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(|e| e.to_string())?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

impl CalendarClient for HttpCalendarClient {
    fn get_page(&self, url: &str) -> Result<HttpResponse, String> {
        let req = match &self.render_endpoint {
            Some(endpoint) => self.client.get(endpoint).query(&[("url", url)]),
            None => self.client.get(url),
        };
        self.send(req)
    }

    fn get_file(&self, url: &str) -> Result<HttpResponse, String> {
        self.send(self.client.get(url))
    }
}

/// Counter-based self-throttle: pause after every `every` calls.
#[derive(Debug, Clone)]
pub struct Throttle {
    every: usize,
    pause: Duration,
    calls: usize,
    pauses: usize,
}

impl Throttle {
    pub fn new(every: usize, pause: Duration) -> Self {
        Self {
            every,
            pause,
            calls: 0,
            pauses: 0,
        }
    }

    /// Count one call; returns the pause to take, if any.
    pub fn tick(&mut self) -> Option<Duration> {
        self.calls += 1;
        if self.every > 0 && self.calls % self.every == 0 {
            self.pauses += 1;
            Some(self.pause)
        } else {
            None
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn pauses(&self) -> usize {
        self.pauses
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(THROTTLE_EVERY, THROTTLE_PAUSE)
    }
}

/// Per-run scrape counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub roots_fetched: usize,
    pub roots_failed: usize,
    pub cache_hits: usize,
    pub rows: usize,
}

pub struct CalendarScraper<'a, C: CalendarClient> {
    client: &'a C,
    throttle: Throttle,
    fetched: HashSet<String>,
    /// Roots whose fetch failed in this run; not retried.
    failed: HashSet<String>,
    reference_year: i32,
    stats: ScrapeStats,
}

impl<'a, C: CalendarClient> CalendarScraper<'a, C> {
    /// `reference_year` anchors single-digit years found in the sheets.
    pub fn new(client: &'a C, throttle: Throttle, reference_year: i32) -> Self {
        Self {
            client,
            throttle,
            fetched: HashSet::new(),
            failed: HashSet::new(),
            reference_year,
            stats: ScrapeStats::default(),
        }
    }

    /// Fetch the calendar of `root`.
    ///
    /// Returns `Ok(None)` when the root was already attempted in this run,
    /// whether that attempt succeeded or not.
    pub fn fetch(&mut self, root: &str, calendar_url: &str) -> Result<Option<Vec<CalendarRow>>, FetchError> {
        if self.fetched.contains(root) {
            self.stats.cache_hits += 1;
            return Ok(None);
        }
        if self.failed.contains(root) {
            debug!(root, "calendar already failed in this run, skipping");
            return Ok(None);
        }

        let result = self.fetch_uncached(root, calendar_url);

        if let Some(pause) = self.throttle.tick() {
            info!(
                calls = self.throttle.calls(),
                "pausing {}s to stay under the exchange request limit",
                pause.as_secs()
            );
            std::thread::sleep(pause);
        }

        match &result {
            Ok(rows) => {
                self.fetched.insert(root.to_string());
                self.stats.roots_fetched += 1;
                self.stats.rows += rows.len();
            }
            Err(e) if !e.is_fatal() => {
                self.failed.insert(root.to_string());
                self.stats.roots_failed += 1;
            }
            Err(_) => {}
        }
        result.map(Some)
    }

    fn fetch_uncached(&self, root: &str, calendar_url: &str) -> Result<Vec<CalendarRow>, FetchError> {
        let page_error = |reason: String| FetchError::CalendarPage {
            root: root.to_string(),
            url: calendar_url.to_string(),
            reason,
        };

        let page = self.client.get_page(calendar_url).map_err(page_error)?;
        if page.status == 403 {
            return Err(FetchError::RateLimited {
                url: calendar_url.to_string(),
            });
        }
        if !page.is_success() {
            return Err(page_error(format!("HTTP {}", page.status)));
        }

        let html = String::from_utf8_lossy(&page.body);
        let link = find_download_link(&html).ok_or_else(|| page_error("no download link on page".to_string()))?;
        let sheet_url = resolve_link(calendar_url, &link).map_err(page_error)?;
        debug!(root, %sheet_url, "downloading calendar spreadsheet");

        let sheet_error = |reason: String| FetchError::SpreadsheetFetch {
            root: root.to_string(),
            url: sheet_url.clone(),
            reason,
        };
        let file = self.client.get_file(&sheet_url).map_err(sheet_error)?;
        if !file.is_success() {
            return Err(sheet_error(format!("HTTP {}", file.status)));
        }

        let parse_error = |reason: String| FetchError::SpreadsheetParse {
            root: root.to_string(),
            url: sheet_url.clone(),
            reason,
        };
        let grid = read_grid(&file.body).map_err(parse_error)?;
        calendar_rows(root, &grid, self.reference_year).map_err(parse_error)
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn stats(&self) -> &ScrapeStats {
        &self.stats
    }
}

/// Find the spreadsheet link behind the download button.
pub fn find_download_link(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let button = Selector::parse(DOWNLOAD_BUTTON_SELECTOR).ok()?;
    let anchor = Selector::parse("a[href]").ok()?;

    let element = doc.select(&button).next()?;
    if let Some(href) = element.value().attr("href") {
        return Some(href.to_string());
    }
    element
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

fn resolve_link(page_url: &str, link: &str) -> Result<String, String> {
    Url::parse(page_url)
        .and_then(|base| base.join(link))
        .map(|u| u.to_string())
        .map_err(|e| format!("bad download link '{link}': {e}"))
}
