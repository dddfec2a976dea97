//! Symbol search hits.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One instrument matching a free-text search query.
///
/// Hits from different sources describe the same instrument when their
/// [`dedup_key`](Self::dedup_key) matches; the first source to report a
/// symbol wins during a union.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub symbol: String,
    pub name: String,
    /// Listing venue as reported by the source ("NASDAQ", "XTSE", ...)
    pub exchange: String,
    /// Source-reported instrument class ("EQUITY", "ETF", ...)
    pub asset_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Source relevance, higher is better. Scales differ between sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SearchResult {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        exchange: impl Into<String>,
        asset_type: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            exchange: exchange.into(),
            asset_type: asset_type.into(),
            currency: None,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Case- and whitespace-insensitive identity used to merge hits.
    pub fn dedup_key(&self) -> String {
        self.symbol.trim().to_uppercase()
    }

    /// Orders hits best-first. Unscored hits sort after scored ones and
    /// keep their relative order under a stable sort.
    pub fn by_relevance(a: &Self, b: &Self) -> Ordering {
        match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_normalizes_symbol() {
        let hit = SearchResult::new(" shop.to ", "Shopify", "XTSE", "EQUITY");
        assert_eq!(hit.dedup_key(), "SHOP.TO");
    }

    #[test]
    fn test_relevance_puts_unscored_last() {
        let mut hits = vec![
            SearchResult::new("A", "a", "X", "EQUITY"),
            SearchResult::new("B", "b", "X", "EQUITY").with_score(0.2),
            SearchResult::new("C", "c", "X", "EQUITY").with_score(0.9),
        ];
        hits.sort_by(SearchResult::by_relevance);

        let order: Vec<_> = hits.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
    }
}
