//! Provider payloads and the results handed back to callers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bar::Bar;
use super::fundamentals::Fundamentals;
use super::operation::Operation;
use super::quote::Quote;
use super::search::SearchResult;
use super::types::ProviderId;
use super::validation::SymbolValidation;
use crate::conflict::FieldConflict;
use crate::registry::FetchDiagnostics;

/// Data returned for a logical request, one variant per operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum MarketData {
    Bars(Vec<Bar>),
    Quotes(Vec<Quote>),
    Validations(Vec<SymbolValidation>),
    SearchResults(Vec<SearchResult>),
    Fundamentals(Vec<Fundamentals>),
}

impl MarketData {
    /// The operation whose answer this payload is.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Bars(_) => Operation::Historical,
            Self::Quotes(_) => Operation::Realtime,
            Self::Validations(_) => Operation::ValidateSymbols,
            Self::SearchResults(_) => Operation::Search,
            Self::Fundamentals(_) => Operation::Fundamentals,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bars(v) => v.len(),
            Self::Quotes(v) => v.len(),
            Self::Validations(v) => v.len(),
            Self::SearchResults(v) => v.len(),
            Self::Fundamentals(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bars(self) -> Option<Vec<Bar>> {
        match self {
            Self::Bars(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_quotes(self) -> Option<Vec<Quote>> {
        match self {
            Self::Quotes(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_validations(self) -> Option<Vec<SymbolValidation>> {
        match self {
            Self::Validations(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_search_results(self) -> Option<Vec<SearchResult>> {
        match self {
            Self::SearchResults(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_fundamentals(self) -> Option<Vec<Fundamentals>> {
        match self {
            Self::Fundamentals(v) => Some(v),
            _ => None,
        }
    }
}

/// What an adapter hands back on success.
///
/// `as_of` is the data timestamp as reported by the upstream source; it is
/// what `latest-timestamp-wins` conflict resolution compares.
#[derive(Clone, Debug)]
pub struct ProviderResponse {
    pub data: MarketData,
    pub as_of: DateTime<Utc>,
}

impl ProviderResponse {
    pub fn new(data: MarketData, as_of: DateTime<Utc>) -> Self {
        Self { data, as_of }
    }

    /// Response stamped with the current time.
    pub fn now(data: MarketData) -> Self {
        Self::new(data, Utc::now())
    }
}

/// Successful result of a public fetch, tagged with where it came from.
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub data: MarketData,

    /// Provider whose answer was returned (the primary source when merged).
    pub source: ProviderId,

    /// Every provider that contributed; more than one only after conflict resolution.
    pub sources: Vec<ProviderId>,

    pub as_of: DateTime<Utc>,

    /// True when served from the response cache without touching any provider.
    pub from_cache: bool,

    /// Fields on which contributing providers disagreed (composite merge only).
    pub conflicts: Vec<FieldConflict>,

    /// Provider attempts made for this result; empty for cache hits.
    pub diagnostics: FetchDiagnostics,

    /// Wall-clock time spent producing the result.
    pub elapsed: Duration,
}

impl FetchResult {
    pub(crate) fn single(
        source: ProviderId,
        response: ProviderResponse,
        diagnostics: FetchDiagnostics,
        elapsed: Duration,
    ) -> Self {
        Self {
            data: response.data,
            sources: vec![source.clone()],
            source,
            as_of: response.as_of,
            from_cache: false,
            conflicts: Vec::new(),
            diagnostics,
            elapsed,
        }
    }
}
