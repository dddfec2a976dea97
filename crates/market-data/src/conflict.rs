//! Reconciliation of answers from several providers.
//!
//! Only used when a caller explicitly asks for multi-source confirmation; the
//! default failover path returns a single provider's answer untouched.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConflictResolutionPolicy;
use crate::errors::FetchError;
use crate::models::{
    Bar, Fundamentals, MarketData, Operation, ProviderId, ProviderResponse, Quote,
    SearchResult, SymbolValidation,
};

/// Relative difference above which two numeric values disagree (1%).
const DEFAULT_NUMERIC_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// One provider's answer, with the provider's rank in the active chain.
#[derive(Clone, Debug)]
pub struct SourcedResponse {
    pub provider_id: ProviderId,
    /// Lower values = higher priority.
    pub priority: u32,
    pub response: ProviderResponse,
}

/// A value one provider reported for a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportedValue {
    pub provider_id: ProviderId,
    pub value: String,
}

/// A field on which contributing providers disagreed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Record the field belongs to (symbol, or symbol@timestamp for bars).
    pub key: String,
    pub field: String,
    /// Every reported value, in provider priority order.
    pub values: Vec<ReportedValue>,
    /// Provider whose value was kept.
    pub chosen: ProviderId,
}

/// Output of a resolution.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub data: MarketData,
    /// The provider whose answer won, or the primary contributor of a merge.
    pub source: ProviderId,
    /// Every provider whose answer was considered, in priority order.
    pub sources: Vec<ProviderId>,
    pub as_of: DateTime<Utc>,
    pub conflicts: Vec<FieldConflict>,
}

/// Merges or picks between concurrent provider answers.
#[derive(Clone, Debug)]
pub struct ConflictResolver {
    numeric_tolerance: Decimal,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self {
            numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
        }
    }

    /// Relative tolerance for numeric fields, e.g. `dec!(0.01)` for 1%.
    pub fn with_numeric_tolerance(mut self, tolerance: Decimal) -> Self {
        self.numeric_tolerance = tolerance.abs();
        self
    }

    /// Reconcile `results` under `policy`.
    ///
    /// Fails with `InvalidRequest` when there is nothing to resolve and with
    /// `ConflictUnresolved` when a composite merge found disagreements and the
    /// policy asks for escalation.
    pub fn resolve(
        &self,
        mut results: Vec<SourcedResponse>,
        policy: ConflictResolutionPolicy,
    ) -> Result<Resolution, FetchError> {
        if results.is_empty() {
            return Err(FetchError::InvalidRequest(
                "no provider answers to resolve".to_string(),
            ));
        }

        results.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });
        let sources: Vec<ProviderId> = results.iter().map(|r| r.provider_id.clone()).collect();

        match policy {
            ConflictResolutionPolicy::PrimaryWins => {
                let winner = results.swap_remove(0);
                Ok(single(winner, sources))
            }
            ConflictResolutionPolicy::LatestTimestampWins => {
                // Sorted by priority, so the first maximum is the highest-priority one.
                let mut best = 0;
                for (i, r) in results.iter().enumerate() {
                    if r.response.as_of > results[best].response.as_of {
                        best = i;
                    }
                }
                let winner = results.swap_remove(best);
                Ok(single(winner, sources))
            }
            ConflictResolutionPolicy::CompositeMerge {
                escalate_on_conflict,
            } => {
                let resolution = self.merge(results, sources);
                if escalate_on_conflict && !resolution.conflicts.is_empty() {
                    debug!(
                        "Conflict: escalating {} unresolved field(s)",
                        resolution.conflicts.len()
                    );
                    return Err(FetchError::ConflictUnresolved(resolution.conflicts));
                }
                Ok(resolution)
            }
        }
    }

    fn merge(&self, results: Vec<SourcedResponse>, sources: Vec<ProviderId>) -> Resolution {
        let source = sources[0].clone();
        let as_of = results
            .iter()
            .map(|r| r.response.as_of)
            .max()
            .unwrap_or_else(Utc::now);
        let kind = results[0].response.data.operation();

        // Answers of another kind cannot be merged into the primary's.
        let answers: Vec<(ProviderId, MarketData)> = results
            .into_iter()
            .filter(|r| r.response.data.operation() == kind)
            .map(|r| (r.provider_id, r.response.data))
            .collect();

        let mut merger = Merger {
            tolerance: self.numeric_tolerance,
            conflicts: Vec::new(),
        };

        let data = match kind {
            Operation::ValidateSymbols => MarketData::Validations(
                merger.validations(collect(answers, MarketData::into_validations)),
            ),
            Operation::Fundamentals => MarketData::Fundamentals(
                merger.fundamentals(collect(answers, MarketData::into_fundamentals)),
            ),
            Operation::Search => MarketData::SearchResults(union_search(
                collect(answers, MarketData::into_search_results),
            )),
            Operation::Realtime => {
                MarketData::Quotes(merger.quotes(collect(answers, MarketData::into_quotes)))
            }
            Operation::Historical => {
                MarketData::Bars(merger.bars(collect(answers, MarketData::into_bars)))
            }
        };

        Resolution {
            data,
            source,
            sources,
            as_of,
            conflicts: merger.conflicts,
        }
    }
}

fn single(winner: SourcedResponse, sources: Vec<ProviderId>) -> Resolution {
    Resolution {
        data: winner.response.data,
        source: winner.provider_id,
        sources,
        as_of: winner.response.as_of,
        conflicts: Vec::new(),
    }
}

fn collect<T>(
    answers: Vec<(ProviderId, MarketData)>,
    extract: fn(MarketData) -> Option<Vec<T>>,
) -> Vec<(ProviderId, Vec<T>)> {
    answers
        .into_iter()
        .filter_map(|(id, data)| extract(data).map(|items| (id, items)))
        .collect()
}

/// Records keyed by `key`, each with the providers that reported it in
/// priority order.
fn group_by<T, K: Ord>(
    answers: Vec<(ProviderId, Vec<T>)>,
    key: impl Fn(&T) -> K,
) -> BTreeMap<K, Vec<(ProviderId, T)>> {
    let mut groups: BTreeMap<K, Vec<(ProviderId, T)>> = BTreeMap::new();
    for (provider, items) in answers {
        for item in items {
            let entry = groups.entry(key(&item)).or_default();
            // A provider listing the same record twice only counts once.
            if entry.iter().all(|(p, _)| *p != provider) {
                entry.push((provider.clone(), item));
            }
        }
    }
    groups
}

fn union_search(answers: Vec<(ProviderId, Vec<SearchResult>)>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (_, results) in answers {
        for result in results {
            if seen.insert(result.dedup_key()) {
                merged.push(result);
            }
        }
    }
    merged.sort_by(SearchResult::by_relevance);
    merged
}

struct Merger {
    tolerance: Decimal,
    conflicts: Vec<FieldConflict>,
}

impl Merger {
    fn validations(
        &mut self,
        answers: Vec<(ProviderId, Vec<SymbolValidation>)>,
    ) -> Vec<SymbolValidation> {
        group_by(answers, |v| v.symbol.trim().to_uppercase())
            .into_iter()
            .map(|(key, reports)| {
                let is_valid = self.field(
                    &key,
                    "is_valid",
                    reports.iter().map(|(p, v)| (p, Some(v.is_valid))),
                    |a, b| a == b,
                );
                let agreeing: Vec<f64> = reports
                    .iter()
                    .filter(|(_, v)| Some(v.is_valid) == is_valid)
                    .map(|(_, v)| v.confidence)
                    .collect();
                let confidence = if agreeing.is_empty() {
                    0.0
                } else {
                    agreeing.iter().sum::<f64>() / agreeing.len() as f64
                };

                let name = self.text(&key, "name", reports.iter().map(|(p, v)| (p, v.name.clone())));
                let exchange = self.text(
                    &key,
                    "exchange",
                    reports.iter().map(|(p, v)| (p, v.exchange.clone())),
                );
                let asset_type = self.text(
                    &key,
                    "asset_type",
                    reports.iter().map(|(p, v)| (p, v.asset_type.clone())),
                );
                let currency = self.text(
                    &key,
                    "currency",
                    reports.iter().map(|(p, v)| (p, v.currency.clone())),
                );

                SymbolValidation {
                    symbol: reports[0].1.symbol.clone(),
                    is_valid: is_valid.unwrap_or(false),
                    name,
                    exchange,
                    asset_type,
                    currency,
                    confidence,
                }
            })
            .collect()
    }

    fn fundamentals(&mut self, answers: Vec<(ProviderId, Vec<Fundamentals>)>) -> Vec<Fundamentals> {
        group_by(answers, |f| f.symbol.trim().to_uppercase())
            .into_iter()
            .map(|(key, reports)| Fundamentals {
                symbol: reports[0].1.symbol.clone(),
                name: self.text(&key, "name", reports.iter().map(|(p, f)| (p, f.name.clone()))),
                sector: self.text(&key, "sector", reports.iter().map(|(p, f)| (p, f.sector.clone()))),
                industry: self.text(
                    &key,
                    "industry",
                    reports.iter().map(|(p, f)| (p, f.industry.clone())),
                ),
                country: self.text(
                    &key,
                    "country",
                    reports.iter().map(|(p, f)| (p, f.country.clone())),
                ),
                currency: self.text(
                    &key,
                    "currency",
                    reports.iter().map(|(p, f)| (p, f.currency.clone())),
                ),
                market_cap: self.number(&key, "market_cap", reports.iter().map(|(p, f)| (p, f.market_cap))),
                pe_ratio: self.number(&key, "pe_ratio", reports.iter().map(|(p, f)| (p, f.pe_ratio))),
                dividend_yield: self.number(
                    &key,
                    "dividend_yield",
                    reports.iter().map(|(p, f)| (p, f.dividend_yield)),
                ),
                shares_outstanding: self
                    .number(
                        &key,
                        "shares_outstanding",
                        reports
                            .iter()
                            .map(|(p, f)| (p, f.shares_outstanding.map(Decimal::from))),
                    )
                    .and_then(|d| u64::try_from(d).ok()),
            })
            .collect()
    }

    fn quotes(&mut self, answers: Vec<(ProviderId, Vec<Quote>)>) -> Vec<Quote> {
        group_by(answers, |q| q.symbol.trim().to_uppercase())
            .into_iter()
            .filter_map(|(key, reports)| {
                self.number(&key, "price", reports.iter().map(|(p, q)| (p, Some(q.price))));
                reports.into_iter().next().map(|(_, quote)| quote)
            })
            .collect()
    }

    fn bars(&mut self, answers: Vec<(ProviderId, Vec<Bar>)>) -> Vec<Bar> {
        group_by(answers, |b| (b.symbol.trim().to_uppercase(), b.timestamp))
            .into_iter()
            .filter_map(|((symbol, timestamp), reports)| {
                let key = format!("{}@{}", symbol, timestamp.to_rfc3339());
                self.number(&key, "close", reports.iter().map(|(p, b)| (p, Some(b.close))));
                reports.into_iter().next().map(|(_, bar)| bar)
            })
            .collect()
    }

    fn text<'a>(
        &mut self,
        key: &str,
        field: &str,
        values: impl Iterator<Item = (&'a ProviderId, Option<String>)>,
    ) -> Option<String> {
        self.field(key, field, values, |a: &String, b: &String| {
            a.trim().eq_ignore_ascii_case(b.trim())
        })
    }

    fn number<'a>(
        &mut self,
        key: &str,
        field: &str,
        values: impl Iterator<Item = (&'a ProviderId, Option<Decimal>)>,
    ) -> Option<Decimal> {
        let tolerance = self.tolerance;
        self.field(key, field, values, move |a: &Decimal, b: &Decimal| {
            within_tolerance(*a, *b, tolerance)
        })
    }

    /// Keep the highest-priority reported value; flag the field when any
    /// other provider reported something that does not `agree` with it.
    fn field<'a, T: Clone + ToString>(
        &mut self,
        key: &str,
        field: &str,
        values: impl Iterator<Item = (&'a ProviderId, Option<T>)>,
        agree: impl Fn(&T, &T) -> bool,
    ) -> Option<T> {
        let reported: Vec<(&ProviderId, T)> = values
            .filter_map(|(p, v)| v.map(|v| (p, v)))
            .collect();
        let (chosen_provider, chosen) = reported.first()?;

        if reported.iter().skip(1).any(|(_, v)| !agree(chosen, v)) {
            self.conflicts.push(FieldConflict {
                key: key.to_string(),
                field: field.to_string(),
                values: reported
                    .iter()
                    .map(|(p, v)| ReportedValue {
                        provider_id: (*p).clone(),
                        value: v.to_string(),
                    })
                    .collect(),
                chosen: (*chosen_provider).clone(),
            });
        }
        Some(chosen.clone())
    }
}

fn within_tolerance(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs());
    if scale.is_zero() {
        return true;
    }
    (a - b).abs() / scale <= tolerance
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sourced(id: &'static str, priority: u32, data: MarketData, as_of: DateTime<Utc>) -> SourcedResponse {
        SourcedResponse {
            provider_id: Cow::Borrowed(id),
            priority,
            response: ProviderResponse::new(data, as_of),
        }
    }

    fn quote(symbol: &str, price: Decimal) -> MarketData {
        MarketData::Quotes(vec![Quote::new(symbol, price, "USD", at(0))])
    }

    #[test]
    fn test_latest_timestamp_wins() {
        let resolver = ConflictResolver::new();
        let resolution = resolver
            .resolve(
                vec![
                    sourced("A", 1, quote("AAPL", dec!(100)), at(10)),
                    sourced("B", 2, quote("AAPL", dec!(101)), at(20)),
                ],
                ConflictResolutionPolicy::LatestTimestampWins,
            )
            .unwrap();
        assert_eq!(resolution.source, "B");
        assert_eq!(resolution.as_of, at(20));
        assert_eq!(resolution.sources, vec!["A", "B"]);
    }

    #[test]
    fn test_primary_wins_regardless_of_timestamp() {
        let resolver = ConflictResolver::new();
        let resolution = resolver
            .resolve(
                vec![
                    sourced("B", 2, quote("AAPL", dec!(101)), at(20)),
                    sourced("A", 1, quote("AAPL", dec!(100)), at(10)),
                ],
                ConflictResolutionPolicy::PrimaryWins,
            )
            .unwrap();
        assert_eq!(resolution.source, "A");
        assert_eq!(resolution.data, quote("AAPL", dec!(100)));
    }

    #[test]
    fn test_latest_timestamp_tie_goes_to_priority() {
        let resolver = ConflictResolver::new();
        let resolution = resolver
            .resolve(
                vec![
                    sourced("B", 2, quote("AAPL", dec!(101)), at(10)),
                    sourced("A", 1, quote("AAPL", dec!(100)), at(10)),
                ],
                ConflictResolutionPolicy::LatestTimestampWins,
            )
            .unwrap();
        assert_eq!(resolution.source, "A");
    }

    #[test]
    fn test_composite_merges_validation_fields() {
        let resolver = ConflictResolver::new();
        let a = MarketData::Validations(vec![SymbolValidation::valid("AAPL", 0.9).with_name("Apple Inc.")]);
        let b = MarketData::Validations(vec![SymbolValidation::valid("AAPL", 0.7)
            .with_name("apple inc.")
            .with_exchange("NASDAQ")]);

        let resolution = resolver
            .resolve(
                vec![sourced("A", 1, a, at(0)), sourced("B", 2, b, at(5))],
                ConflictResolutionPolicy::CompositeMerge {
                    escalate_on_conflict: false,
                },
            )
            .unwrap();

        assert!(resolution.conflicts.is_empty());
        let merged = resolution.data.into_validations().unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name.as_deref(), Some("Apple Inc."));
        assert_eq!(merged[0].exchange.as_deref(), Some("NASDAQ"));
        assert!((merged[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(resolution.as_of, at(5));
    }

    #[test]
    fn test_composite_flags_disagreement() {
        let resolver = ConflictResolver::new();
        let a = MarketData::Validations(vec![SymbolValidation::valid("XYZ", 0.6)]);
        let b = MarketData::Validations(vec![SymbolValidation::invalid("XYZ")]);

        let resolution = resolver
            .resolve(
                vec![sourced("A", 1, a, at(0)), sourced("B", 2, b, at(0))],
                ConflictResolutionPolicy::CompositeMerge {
                    escalate_on_conflict: false,
                },
            )
            .unwrap();

        assert_eq!(resolution.conflicts.len(), 1);
        let conflict = &resolution.conflicts[0];
        assert_eq!(conflict.key, "XYZ");
        assert_eq!(conflict.field, "is_valid");
        assert_eq!(conflict.chosen, "A");
        assert_eq!(conflict.values.len(), 2);

        let merged = resolution.data.into_validations().unwrap();
        assert!(merged[0].is_valid);
    }

    #[test]
    fn test_composite_escalates() {
        let resolver = ConflictResolver::new();
        let a = MarketData::Validations(vec![SymbolValidation::valid("XYZ", 0.6)]);
        let b = MarketData::Validations(vec![SymbolValidation::invalid("XYZ")]);

        let err = resolver
            .resolve(
                vec![sourced("A", 1, a, at(0)), sourced("B", 2, b, at(0))],
                ConflictResolutionPolicy::CompositeMerge {
                    escalate_on_conflict: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::ConflictUnresolved(ref c) if c.len() == 1));
    }

    #[test]
    fn test_numeric_tolerance() {
        let resolver = ConflictResolver::new();
        let policy = ConflictResolutionPolicy::CompositeMerge {
            escalate_on_conflict: false,
        };

        let close = resolver
            .resolve(
                vec![
                    sourced("A", 1, quote("AAPL", dec!(100.00)), at(0)),
                    sourced("B", 2, quote("AAPL", dec!(100.50)), at(0)),
                ],
                policy,
            )
            .unwrap();
        assert!(close.conflicts.is_empty());

        let apart = resolver
            .resolve(
                vec![
                    sourced("A", 1, quote("AAPL", dec!(100)), at(0)),
                    sourced("B", 2, quote("AAPL", dec!(105)), at(0)),
                ],
                policy,
            )
            .unwrap();
        assert_eq!(apart.conflicts.len(), 1);
        assert_eq!(apart.conflicts[0].field, "price");
    }

    #[test]
    fn test_search_union_deduplicates() {
        let resolver = ConflictResolver::new();
        let a = MarketData::SearchResults(vec![
            SearchResult::new("AAPL", "Apple Inc.", "NASDAQ", "EQUITY"),
        ]);
        let b = MarketData::SearchResults(vec![
            SearchResult::new("aapl", "Apple", "NASDAQ", "EQUITY"),
            SearchResult::new("APLE", "Apple Hospitality", "NYSE", "EQUITY"),
        ]);

        let resolution = resolver
            .resolve(
                vec![sourced("A", 1, a, at(0)), sourced("B", 2, b, at(0))],
                ConflictResolutionPolicy::CompositeMerge {
                    escalate_on_conflict: true,
                },
            )
            .unwrap();
        let results = resolution.data.into_search_results().unwrap();
        let symbols: Vec<_> = results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "APLE"]);
    }

    #[test]
    fn test_fundamentals_fill_gaps() {
        let resolver = ConflictResolver::new();
        let mut a = Fundamentals::new("MSFT");
        a.sector = Some("Technology".to_string());
        let mut b = Fundamentals::new("MSFT");
        b.pe_ratio = Some(dec!(35.2));
        b.sector = Some("Technology".to_string());

        let resolution = resolver
            .resolve(
                vec![
                    sourced("A", 1, MarketData::Fundamentals(vec![a]), at(0)),
                    sourced("B", 2, MarketData::Fundamentals(vec![b]), at(0)),
                ],
                ConflictResolutionPolicy::CompositeMerge {
                    escalate_on_conflict: true,
                },
            )
            .unwrap();
        let merged = resolution.data.into_fundamentals().unwrap();
        assert_eq!(merged[0].sector.as_deref(), Some("Technology"));
        assert_eq!(merged[0].pe_ratio, Some(dec!(35.2)));
    }

    #[test]
    fn test_empty_results_rejected() {
        let resolver = ConflictResolver::new();
        assert!(matches!(
            resolver.resolve(vec![], ConflictResolutionPolicy::PrimaryWins),
            Err(FetchError::InvalidRequest(_))
        ));
    }
}
