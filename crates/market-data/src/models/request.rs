//! Logical requests and their normalization.
//!
//! Requests are normalized before they reach the cache or any provider so that
//! two semantically identical requests (same symbols in a different order,
//! a reversed date range, extra whitespace in a search query) are the same
//! request everywhere downstream.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::operation::Operation;

/// Inclusive calendar date range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, swapping the bounds if they are reversed.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Bar interval for historical requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1wk",
            Self::OneMonth => "1mo",
        }
    }
}

/// A logical data request, routed to whichever provider can serve it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FetchRequest {
    Historical {
        symbols: Vec<String>,
        range: DateRange,
        interval: Interval,
    },
    Realtime {
        symbols: Vec<String>,
    },
    ValidateSymbols {
        symbols: Vec<String>,
    },
    Search {
        query: String,
    },
    Fundamentals {
        symbols: Vec<String>,
    },
}

impl FetchRequest {
    pub fn historical<S: AsRef<str>>(symbols: &[S], range: DateRange, interval: Interval) -> Self {
        Self::Historical {
            symbols: owned(symbols),
            range,
            interval,
        }
    }

    pub fn realtime<S: AsRef<str>>(symbols: &[S]) -> Self {
        Self::Realtime {
            symbols: owned(symbols),
        }
    }

    pub fn validate_symbols<S: AsRef<str>>(symbols: &[S]) -> Self {
        Self::ValidateSymbols {
            symbols: owned(symbols),
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self::Search {
            query: query.into(),
        }
    }

    pub fn fundamentals<S: AsRef<str>>(symbols: &[S]) -> Self {
        Self::Fundamentals {
            symbols: owned(symbols),
        }
    }

    /// The logical operation this request maps to.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Historical { .. } => Operation::Historical,
            Self::Realtime { .. } => Operation::Realtime,
            Self::ValidateSymbols { .. } => Operation::ValidateSymbols,
            Self::Search { .. } => Operation::Search,
            Self::Fundamentals { .. } => Operation::Fundamentals,
        }
    }

    /// Symbols carried by the request (empty for search).
    pub fn symbols(&self) -> &[String] {
        match self {
            Self::Historical { symbols, .. }
            | Self::Realtime { symbols }
            | Self::ValidateSymbols { symbols }
            | Self::Fundamentals { symbols } => symbols,
            Self::Search { .. } => &[],
        }
    }

    /// Canonical form of this request.
    ///
    /// Symbols are trimmed, upper-cased, sorted and de-duplicated; blank
    /// symbols are dropped. Search queries are trimmed, lower-cased and have
    /// internal whitespace collapsed. Date ranges are already ordered by
    /// [`DateRange::new`], but a deserialized range is re-ordered here.
    pub fn normalized(&self) -> Self {
        match self {
            Self::Historical {
                symbols,
                range,
                interval,
            } => Self::Historical {
                symbols: normalize_symbols(symbols),
                range: DateRange::new(range.start, range.end),
                interval: *interval,
            },
            Self::Realtime { symbols } => Self::Realtime {
                symbols: normalize_symbols(symbols),
            },
            Self::ValidateSymbols { symbols } => Self::ValidateSymbols {
                symbols: normalize_symbols(symbols),
            },
            Self::Search { query } => Self::Search {
                query: normalize_query(query),
            },
            Self::Fundamentals { symbols } => Self::Fundamentals {
                symbols: normalize_symbols(symbols),
            },
        }
    }

    /// Whether the normalized request carries anything to fetch.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Search { query } => query.trim().is_empty(),
            _ => self.symbols().iter().all(|s| s.trim().is_empty()),
        }
    }
}

fn owned<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    symbols.iter().map(|s| s.as_ref().to_string()).collect()
}

fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut out: Vec<String> = symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_orders_bounds() {
        let range = DateRange::new(date(2024, 3, 1), date(2024, 1, 1));
        assert_eq!(range.start, date(2024, 1, 1));
        assert_eq!(range.end, date(2024, 3, 1));
        assert!(range.contains(date(2024, 2, 10)));
    }

    #[test]
    fn test_symbols_are_sorted_and_deduplicated() {
        let req = FetchRequest::realtime(&[" msft", "AAPL", "aapl", ""]).normalized();
        assert_eq!(req.symbols(), &["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn test_query_whitespace_collapsed() {
        let req = FetchRequest::search("  Apple   Inc ").normalized();
        assert_eq!(req, FetchRequest::search("apple inc"));
    }

    #[test]
    fn test_is_empty() {
        assert!(FetchRequest::realtime::<&str>(&[]).is_empty());
        assert!(FetchRequest::realtime(&["  "]).is_empty());
        assert!(FetchRequest::search("   ").is_empty());
        assert!(!FetchRequest::search("spy").is_empty());
    }
}
