//! Cost and performance bookkeeping per provider.
//!
//! Recording is synchronous and infallible: it runs right after the outcome it
//! records, under the provider's own shard lock, and never surfaces an error
//! to the fetch path.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::RequestOutcome;

/// Aggregated calls for one provider over a time window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub provider_id: String,
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub estimated_cost: Decimal,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct CallEntry {
    at: DateTime<Utc>,
    latency: Duration,
    success: bool,
    cost: Decimal,
}

/// Totals folded out of the itemized entries by `roll_up`.
#[derive(Clone, Debug, Default)]
struct RolledUp {
    calls: u64,
    failures: u64,
    total_latency: Duration,
    cost: Decimal,
    since: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Ledger {
    entries: VecDeque<CallEntry>,
    rolled: RolledUp,
}

impl Ledger {
    /// Fold itemized records older than `threshold` into the rolled-up totals.
    fn fold_before(&mut self, threshold: DateTime<Utc>) -> usize {
        let mut folded = 0;
        while self
            .entries
            .front()
            .map(|c| c.at < threshold)
            .unwrap_or(false)
        {
            if let Some(call) = self.entries.pop_front() {
                accumulate(&mut self.rolled, &call);
                folded += 1;
            }
        }
        folded
    }

    #[cfg(test)]
    fn itemized(&self) -> usize {
        self.entries.len()
    }
}

/// Per-provider call counts, latencies and estimated spend.
pub struct CostTracker {
    rates: DashMap<String, Decimal>,
    ledgers: DashMap<String, Ledger>,
    retention: Duration,
}

impl CostTracker {
    /// Tracker keeping itemized records for `retention` before rolling them up.
    pub fn new(retention: Duration) -> Self {
        Self {
            rates: DashMap::new(),
            ledgers: DashMap::new(),
            retention,
        }
    }

    /// Set the estimated cost of one call to `provider`.
    pub fn register_rate(&self, provider: &str, cost_per_call: Decimal) {
        let previous = self.rates.insert(provider.to_string(), cost_per_call);
        if previous != Some(cost_per_call) {
            info!(
                "Cost: rate for '{}' set to {} per call",
                provider, cost_per_call
            );
        }
        self.ledgers.entry(provider.to_string()).or_default();
    }

    pub fn rate(&self, provider: &str) -> Decimal {
        self.rates
            .get(provider)
            .map(|r| *r)
            .unwrap_or(Decimal::ZERO)
    }

    /// Record one provider call. Every call is charged, failed or not.
    ///
    /// Records of this provider older than the retention window are folded
    /// into its lifetime totals on the way, so a ledger stays bounded by the
    /// window even when `roll_up` is never called.
    pub fn record(&self, outcome: &RequestOutcome) {
        let cost = self.rate(&outcome.provider_id);
        let threshold = cutoff(Utc::now(), self.retention);
        let mut ledger = self
            .ledgers
            .entry(outcome.provider_id.to_string())
            .or_default();
        ledger.entries.push_back(CallEntry {
            at: outcome.timestamp,
            latency: outcome.latency,
            success: outcome.success,
            cost,
        });
        ledger.fold_before(threshold);
    }

    /// Per-provider totals for calls recorded within the last `window`.
    ///
    /// Only itemized records are covered; anything already rolled up is
    /// reported by [`lifetime`](Self::lifetime).
    pub fn report(&self, window: Duration) -> Vec<CostRecord> {
        let window_end = Utc::now();
        let window_start = cutoff(window_end, window);

        let mut records: Vec<CostRecord> = self
            .ledgers
            .iter()
            .map(|entry| {
                let mut acc = RolledUp::default();
                for call in entry.entries.iter().filter(|c| c.at >= window_start) {
                    accumulate(&mut acc, call);
                }
                to_record(entry.key(), &acc, window_start, window_end)
            })
            .collect();
        records.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        records
    }

    /// Per-provider totals since tracking started, rolled-up records included.
    pub fn lifetime(&self) -> Vec<CostRecord> {
        let now = Utc::now();
        let mut records: Vec<CostRecord> = self
            .ledgers
            .iter()
            .map(|entry| {
                let mut acc = entry.rolled.clone();
                for call in &entry.entries {
                    accumulate(&mut acc, call);
                }
                let since = acc.since.unwrap_or(now);
                to_record(entry.key(), &acc, since, now)
            })
            .collect();
        records.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        records
    }

    /// Fold records older than the retention window into lifetime totals.
    /// Returns how many records were folded.
    pub fn roll_up(&self) -> usize {
        let threshold = cutoff(Utc::now(), self.retention);
        let mut folded = 0;
        for mut ledger in self.ledgers.iter_mut() {
            folded += ledger.fold_before(threshold);
        }
        if folded > 0 {
            debug!("Cost: rolled up {} call records", folded);
        }
        folded
    }

    /// Total estimated spend across providers since tracking started.
    pub fn total_cost(&self) -> Decimal {
        self.lifetime().iter().map(|r| r.estimated_cost).sum()
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}

fn accumulate(acc: &mut RolledUp, call: &CallEntry) {
    acc.calls += 1;
    if !call.success {
        acc.failures += 1;
    }
    acc.total_latency = acc.total_latency.saturating_add(call.latency);
    acc.cost += call.cost;
    acc.since = Some(acc.since.map_or(call.at, |s| s.min(call.at)));
}

fn to_record(
    provider: &str,
    acc: &RolledUp,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> CostRecord {
    let avg_latency_ms = if acc.calls == 0 {
        0.0
    } else {
        acc.total_latency.as_secs_f64() * 1000.0 / acc.calls as f64
    };
    CostRecord {
        provider_id: provider.to_string(),
        calls: acc.calls,
        failures: acc.failures,
        avg_latency_ms,
        estimated_cost: acc.cost,
        window_start,
        window_end,
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::Operation;

    fn outcome(provider: &'static str, ok: bool, latency_ms: u64) -> RequestOutcome {
        let latency = Duration::from_millis(latency_ms);
        if ok {
            RequestOutcome::success(Cow::Borrowed(provider), Operation::Realtime, latency)
        } else {
            RequestOutcome::failure(
                Cow::Borrowed(provider),
                Operation::Realtime,
                latency,
                ErrorKind::Upstream,
            )
        }
    }

    #[test]
    fn test_report_aggregates_per_provider() {
        let tracker = CostTracker::default();
        tracker.register_rate("YAHOO", dec!(0.001));
        tracker.register_rate("POLYGON", dec!(0.01));

        tracker.record(&outcome("YAHOO", true, 100));
        tracker.record(&outcome("YAHOO", false, 300));
        tracker.record(&outcome("POLYGON", true, 50));

        let report = tracker.report(Duration::from_secs(60));
        assert_eq!(report.len(), 2);

        let polygon = &report[0];
        assert_eq!(polygon.provider_id, "POLYGON");
        assert_eq!(polygon.calls, 1);
        assert_eq!(polygon.estimated_cost, dec!(0.01));

        let yahoo = &report[1];
        assert_eq!(yahoo.calls, 2);
        assert_eq!(yahoo.failures, 1);
        assert!((yahoo.avg_latency_ms - 200.0).abs() < 1e-6);
        assert_eq!(yahoo.estimated_cost, dec!(0.002));
    }

    #[test]
    fn test_unregistered_provider_costs_nothing() {
        let tracker = CostTracker::default();
        tracker.record(&outcome("FREE", true, 10));

        let report = tracker.report(Duration::from_secs(60));
        assert_eq!(report[0].calls, 1);
        assert_eq!(report[0].estimated_cost, Decimal::ZERO);
    }

    #[test]
    fn test_registered_provider_reported_without_calls() {
        let tracker = CostTracker::default();
        tracker.register_rate("IDLE", dec!(0.5));

        let report = tracker.report(Duration::from_secs(60));
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].calls, 0);
        assert_eq!(report[0].avg_latency_ms, 0.0);
    }

    #[test]
    fn test_roll_up_keeps_lifetime_totals() {
        let tracker = CostTracker::new(Duration::from_millis(10));
        tracker.register_rate("YAHOO", dec!(0.25));
        tracker.record(&outcome("YAHOO", true, 20));
        tracker.record(&outcome("YAHOO", true, 40));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(tracker.roll_up(), 2);

        let recent = tracker.report(Duration::from_millis(10));
        assert_eq!(recent[0].calls, 0);

        let lifetime = tracker.lifetime();
        assert_eq!(lifetime[0].calls, 2);
        assert_eq!(lifetime[0].estimated_cost, dec!(0.50));
        assert_eq!(tracker.total_cost(), dec!(0.50));
    }

    #[test]
    fn test_record_folds_stale_entries_without_roll_up() {
        let tracker = CostTracker::new(Duration::from_millis(10));
        tracker.register_rate("YAHOO", dec!(0.1));

        for _ in 0..5 {
            tracker.record(&outcome("YAHOO", true, 5));
        }
        std::thread::sleep(Duration::from_millis(20));
        tracker.record(&outcome("YAHOO", false, 5));

        let itemized = tracker
            .ledgers
            .get("YAHOO")
            .map(|l| l.itemized())
            .unwrap_or_default();
        assert_eq!(itemized, 1);

        let lifetime = tracker.lifetime();
        assert_eq!(lifetime[0].calls, 6);
        assert_eq!(lifetime[0].failures, 1);
        assert_eq!(lifetime[0].estimated_cost, dec!(0.6));
    }
}
