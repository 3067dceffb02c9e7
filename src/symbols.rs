//! Contract code conventions.
//!
//! Vendor codes are long form (`ESZ2024`: root + month code + 4-digit year),
//! exchange codes are short form (`ESZ24`: root + month code + 2-digit year).
//! Everything here is pure; malformed input yields a `SymbolError`.

use chrono::{NaiveDate, Weekday};

use crate::error::SymbolError;

/// Trailing month code + 4-digit year.
pub const LONG_SUFFIX_LEN: usize = 5;
/// Trailing month code + 2-digit year.
pub const SHORT_SUFFIX_LEN: usize = 3;

/// Two-digit years at or below this pivot are 20xx, above it 19xx.
const CENTURY_PIVOT: i32 = 79;

/// Which suffix convention a code follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolForm {
    Long,
    Short,
}

impl SymbolForm {
    pub fn suffix_len(self) -> usize {
        match self {
            SymbolForm::Long => LONG_SUFFIX_LEN,
            SymbolForm::Short => SHORT_SUFFIX_LEN,
        }
    }

    /// Infer the form from the number of trailing digits (4 = long, 2 = short).
    pub fn detect(code: &str) -> Option<SymbolForm> {
        match trailing_digits(code) {
            4 => Some(SymbolForm::Long),
            2 => Some(SymbolForm::Short),
            _ => None,
        }
    }
}

/// CME month code to calendar month.
pub fn month_from_code(c: char) -> Option<u32> {
    Some(match c {
        'F' => 1,
        'G' => 2,
        'H' => 3,
        'J' => 4,
        'K' => 5,
        'M' => 6,
        'N' => 7,
        'Q' => 8,
        'U' => 9,
        'V' => 10,
        'X' => 11,
        'Z' => 12,
        _ => return None,
    })
}

/// `ESZ2024` -> `ESZ24`.
pub fn to_short_symbol(long: &str) -> Result<String, SymbolError> {
    check_code(long, LONG_SUFFIX_LEN)?;
    if trailing_digits(long) < 4 {
        return Err(SymbolError::BadYear(long.to_string()));
    }
    let n = long.len();
    Ok(format!("{}{}", &long[..n - 4], &long[n - 2..]))
}

/// Root symbol: everything before the month code + year suffix.
pub fn root_symbol(code: &str, form: SymbolForm) -> Result<&str, SymbolError> {
    let suffix = form.suffix_len();
    check_code(code, suffix)?;
    Ok(&code[..code.len() - suffix])
}

/// Contract year and month code.
///
/// Two-digit years are expanded with a fixed century pivot, so `ESZ24`
/// and `ESZ2024` both yield `(2024, 'Z')`.
pub fn contract_month(code: &str) -> Result<(i32, char), SymbolError> {
    let digits = trailing_digits(code);
    let form = match digits {
        4 => SymbolForm::Long,
        2 => SymbolForm::Short,
        _ => return Err(SymbolError::BadYear(code.to_string())),
    };
    check_code(code, form.suffix_len())?;

    let n = code.len();
    let year: i32 = code[n - digits..]
        .parse()
        .map_err(|_| SymbolError::BadYear(code.to_string()))?;
    let year = if digits == 2 { expand_two_digit_year(year) } else { year };

    let month = code[..n - digits]
        .chars()
        .last()
        .ok_or_else(|| SymbolError::TooShort(code.to_string()))?;
    if month_from_code(month).is_none() {
        return Err(SymbolError::BadMonth {
            code: code.to_string(),
            month,
        });
    }
    Ok((year, month))
}

/// Third Friday of the contract month, used when no real expiration is known.
pub fn third_friday(code: &str) -> Result<NaiveDate, SymbolError> {
    let (year, month_code) = contract_month(code)?;
    let month = month_from_code(month_code).ok_or_else(|| SymbolError::BadMonth {
        code: code.to_string(),
        month: month_code,
    })?;
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Fri, 3)
        .ok_or_else(|| SymbolError::BadYear(code.to_string()))
}

/// Expand `yy` to a four-digit year.
pub fn expand_two_digit_year(yy: i32) -> i32 {
    if yy <= CENTURY_PIVOT { 2000 + yy } else { 1900 + yy }
}

/// Expand a single year digit to the nearest year not more than two years
/// before `reference_year`.
pub fn expand_one_digit_year(d: i32, reference_year: i32) -> i32 {
    let mut y = (reference_year / 10) * 10 + d;
    if y < reference_year - 2 {
        y += 10;
    }
    y
}

fn trailing_digits(code: &str) -> usize {
    code.bytes().rev().take_while(|b| b.is_ascii_digit()).count()
}

fn check_code(code: &str, suffix: usize) -> Result<(), SymbolError> {
    if !code.is_ascii() {
        return Err(SymbolError::NotAscii(code.to_string()));
    }
    if code.len() <= suffix {
        return Err(SymbolError::TooShort(code.to_string()));
    }
    Ok(())
}
