//! Request fingerprints used as cache keys.
//!
//! The fingerprint is a SHA-256 of the operation name and the request's
//! normalized parameters, so semantically identical requests share a key no
//! matter how their symbols were ordered, cased or repeated.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::FetchRequest;

/// Deterministic cache key for a logical request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a request.
    pub fn of(request: &FetchRequest) -> Self {
        let normalized = request.normalized();
        let mut hasher = Sha256::new();

        hasher.update(normalized.operation().as_str().as_bytes());
        hasher.update(b"|");

        match &normalized {
            FetchRequest::Historical {
                symbols,
                range,
                interval,
            } => {
                update_symbols(&mut hasher, symbols);
                hasher.update(range.start.format("%Y-%m-%d").to_string().as_bytes());
                hasher.update(b"|");
                hasher.update(range.end.format("%Y-%m-%d").to_string().as_bytes());
                hasher.update(b"|");
                hasher.update(interval.as_str().as_bytes());
            }
            FetchRequest::Search { query } => {
                hasher.update(query.as_bytes());
            }
            FetchRequest::Realtime { symbols }
            | FetchRequest::ValidateSymbols { symbols }
            | FetchRequest::Fundamentals { symbols } => {
                update_symbols(&mut hasher, symbols);
            }
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn update_symbols(hasher: &mut Sha256, symbols: &[String]) {
    for symbol in symbols {
        hasher.update(symbol.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.update(b"|");
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::{DateRange, Interval};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_symbol_order_does_not_matter() {
        let a = FetchRequest::realtime(&["MSFT", "AAPL"]);
        let b = FetchRequest::realtime(&["aapl ", "MSFT", "AAPL"]);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_reversed_range_normalized() {
        let a = FetchRequest::historical(
            &["AAPL"],
            DateRange::new(date(2024, 1, 1), date(2024, 3, 31)),
            Interval::OneDay,
        );
        let b = FetchRequest::historical(
            &["AAPL"],
            DateRange::new(date(2024, 3, 31), date(2024, 1, 1)),
            Interval::OneDay,
        );
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_operation_distinguishes() {
        let quotes = FetchRequest::realtime(&["AAPL"]);
        let validation = FetchRequest::validate_symbols(&["AAPL"]);
        let fundamentals = FetchRequest::fundamentals(&["AAPL"]);
        assert_ne!(Fingerprint::of(&quotes), Fingerprint::of(&validation));
        assert_ne!(Fingerprint::of(&validation), Fingerprint::of(&fundamentals));
    }

    #[test]
    fn test_interval_distinguishes() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        let daily = FetchRequest::historical(&["AAPL"], range, Interval::OneDay);
        let hourly = FetchRequest::historical(&["AAPL"], range, Interval::OneHour);
        assert_ne!(Fingerprint::of(&daily), Fingerprint::of(&hourly));
    }

    #[test]
    fn test_query_whitespace_and_case() {
        let a = FetchRequest::search("Apple  Inc");
        let b = FetchRequest::search("  apple inc ");
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).as_str().len(), 64);
    }
}
