//! Error types.
//!
//! `AppError` is the run-level error: it carries the process exit code and a
//! human-readable message, and is what `main` finally reports. Component errors
//! (`SymbolError`, `FetchError`) are narrower enums that callers either recover
//! from or convert into an `AppError`.

use thiserror::Error;

/// Exit code for bad configuration or unreadable local inputs.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code for inputs that parse but contain no usable data.
pub const EXIT_DATA: u8 = 3;
/// Exit code for network/vendor failures.
pub const EXIT_NETWORK: u8 = 4;
/// Exit code for an exchange rate ban (HTTP 403).
pub const EXIT_RATE_LIMITED: u8 = 5;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Malformed contract code. Always a caller bug or bad vendor row, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("contract code '{0}' is too short")]
    TooShort(String),
    #[error("contract code '{0}' must be ASCII")]
    NotAscii(String),
    #[error("contract code '{0}' has no valid year suffix")]
    BadYear(String),
    #[error("contract code '{code}' has unknown month code '{month}'")]
    BadMonth { code: String, month: char },
}

impl From<SymbolError> for AppError {
    fn from(err: SymbolError) -> Self {
        AppError::new(EXIT_DATA, err.to_string())
    }
}

/// Failure of one calendar fetch.
///
/// Everything except `RateLimited` is scoped to a single root symbol: the
/// caller logs it and carries on without rows for that root.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("calendar page for {root} unavailable ({url}): {reason}")]
    CalendarPage {
        root: String,
        url: String,
        reason: String,
    },
    #[error("spreadsheet for {root} could not be downloaded ({url}): {reason}")]
    SpreadsheetFetch {
        root: String,
        url: String,
        reason: String,
    },
    #[error("spreadsheet for {root} could not be parsed ({url}): {reason}")]
    SpreadsheetParse {
        root: String,
        url: String,
        reason: String,
    },
    #[error("exchange refused {url} with HTTP 403; this IP is probably banned, try again later")]
    RateLimited { url: String },
}

impl FetchError {
    /// Whether this failure must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        let code = if err.is_fatal() {
            EXIT_RATE_LIMITED
        } else {
            EXIT_NETWORK
        };
        AppError::new(code, err.to_string())
    }
}
