//! In-memory TTL response cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprint;
use crate::config::ConflictResolutionPolicy;
use crate::conflict::FieldConflict;
use crate::models::{MarketData, Operation, ProviderId};

/// Cache configuration, with one TTL per operation.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub realtime_ttl: Duration,
    pub historical_ttl: Duration,
    pub validation_ttl: Duration,
    pub search_ttl: Duration,
    pub fundamentals_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            realtime_ttl: Duration::from_secs(15),
            historical_ttl: Duration::from_secs(60 * 60),
            validation_ttl: Duration::from_secs(24 * 60 * 60),
            search_ttl: Duration::from_secs(60 * 60),
            fundamentals_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn ttl_for(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Historical => self.historical_ttl,
            Operation::Realtime => self.realtime_ttl,
            Operation::ValidateSymbols => self.validation_ttl,
            Operation::Search => self.search_ttl,
            Operation::Fundamentals => self.fundamentals_ttl,
        }
    }
}

/// A fetched answer as stored in the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedValue {
    pub data: MarketData,
    pub source: ProviderId,
    pub sources: Vec<ProviderId>,
    pub as_of: DateTime<Utc>,
    /// Disagreements flagged when the answer was merged; served with every hit.
    pub conflicts: Vec<FieldConflict>,
    /// How the answer was obtained.
    pub provenance: Provenance,
}

/// Whether a cached answer came from one provider or was confirmed across
/// several and reconciled under a policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provenance {
    #[default]
    SingleSource,
    Confirmed {
        sources: usize,
        policy: ConflictResolutionPolicy,
    },
}

impl Provenance {
    /// Provenance of an answer fetched with `confirm_sources` and `policy`.
    pub fn of(confirm_sources: usize, policy: ConflictResolutionPolicy) -> Self {
        if confirm_sources > 1 {
            Self::Confirmed {
                sources: confirm_sources,
                policy,
            }
        } else {
            Self::SingleSource
        }
    }

    /// Whether an answer with this provenance may serve a request asking
    /// for `wanted`.
    ///
    /// Any answer serves a single-source request. A confirmed request needs
    /// at least as many sources reconciled under the same policy.
    pub fn satisfies(&self, wanted: &Provenance) -> bool {
        match (self, wanted) {
            (_, Self::SingleSource) => true,
            (Self::SingleSource, Self::Confirmed { .. }) => false,
            (
                Self::Confirmed { sources, policy },
                Self::Confirmed {
                    sources: wanted_sources,
                    policy: wanted_policy,
                },
            ) => sources >= wanted_sources && policy == wanted_policy,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub value: CachedValue,
    pub created_at: DateTime<Utc>,
    /// `None` when the TTL is too large to represent; the entry never expires.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// Hit/miss counters since the cache was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Concurrent fingerprint -> value store with lazy expiry.
///
/// Reads never serialize on a global lock: entries live in a sharded
/// `DashMap`. An expired entry is removed by the read that finds it.
pub struct ResponseCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint. Expired entries are removed and count as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.get_for(fingerprint, &Provenance::SingleSource)
    }

    /// Look up a fingerprint whose stored answer satisfies `wanted`.
    ///
    /// An entry of weaker provenance is left in place and counts as a miss;
    /// the fetch that follows overwrites it.
    pub fn get_for(&self, fingerprint: &Fingerprint, wanted: &Provenance) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let expired = match self.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired() => {
                if entry.value().value.provenance.satisfies(wanted) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value().clone());
                }
                false
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // The shard guard above is released before removing.
            if self
                .entries
                .remove_if(fingerprint, |_, e| e.is_expired())
                .is_some()
            {
                debug!("Cache: evicted expired entry {}", fingerprint);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value. A zero TTL or a disabled cache makes this a no-op.
    pub fn put(&self, fingerprint: Fingerprint, value: CachedValue, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            value,
            created_at: Utc::now(),
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.insert(fingerprint, entry);
    }

    /// Remove an entry. Returns whether one was present; repeating is a no-op.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::models::{FetchRequest, Quote};
    use rust_decimal_macros::dec;

    fn value() -> CachedValue {
        CachedValue {
            data: MarketData::Quotes(vec![Quote::new("AAPL", dec!(190.5), "USD", Utc::now())]),
            source: Cow::Borrowed("YAHOO"),
            sources: vec![Cow::Borrowed("YAHOO")],
            as_of: Utc::now(),
            conflicts: Vec::new(),
            provenance: Provenance::SingleSource,
        }
    }

    fn confirmed(sources: usize) -> Provenance {
        Provenance::of(
            sources,
            ConflictResolutionPolicy::CompositeMerge {
                escalate_on_conflict: false,
            },
        )
    }

    fn key() -> Fingerprint {
        Fingerprint::of(&FetchRequest::realtime(&["AAPL"]))
    }

    #[test]
    fn test_put_and_get() {
        let cache = ResponseCache::new(true);
        assert!(cache.get(&key()).is_none());

        cache.put(key(), value(), Duration::from_secs(60));
        let entry = cache.get(&key()).expect("cached");
        assert_eq!(entry.value.source, "YAHOO");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let cache = ResponseCache::new(true);
        cache.put(key(), value(), Duration::from_millis(20));
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get(&key()).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate_twice_is_noop() {
        let cache = ResponseCache::new(true);
        cache.put(key(), value(), Duration::from_secs(60));

        assert!(cache.invalidate(&key()));
        assert!(!cache.invalidate(&key()));
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ResponseCache::new(false);
        cache.put(key(), value(), Duration::from_secs(60));
        assert!(cache.is_empty());
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_zero_ttl_is_noop() {
        let cache = ResponseCache::new(true);
        cache.put(key(), value(), Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = ResponseCache::new(true);
        cache.put(key(), value(), Duration::from_millis(10));
        cache.put(
            Fingerprint::of(&FetchRequest::realtime(&["MSFT"])),
            value(),
            Duration::from_secs(60),
        );

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_per_operation() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_for(Operation::Realtime), Duration::from_secs(15));
        assert_eq!(
            config.ttl_for(Operation::Historical),
            Duration::from_secs(3600)
        );
        assert!(!CacheConfig::disabled().enabled);
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let cache = ResponseCache::new(true);
        cache.put(key(), value(), Duration::MAX);

        let entry = cache.get(&key()).expect("cached");
        assert!(!entry.is_expired());
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_single_source_entry_does_not_serve_confirmed_read() {
        let cache = ResponseCache::new(true);
        cache.put(key(), value(), Duration::from_secs(60));

        assert!(cache.get_for(&key(), &confirmed(2)).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key()).is_some());
    }

    #[test]
    fn test_confirmed_entry_serves_weaker_reads() {
        let cache = ResponseCache::new(true);
        let mut stored = value();
        stored.provenance = confirmed(3);
        cache.put(key(), stored, Duration::from_secs(60));

        assert!(cache.get_for(&key(), &confirmed(2)).is_some());
        assert!(cache.get_for(&key(), &Provenance::SingleSource).is_some());
        assert!(cache.get_for(&key(), &confirmed(4)).is_none());
        assert!(cache
            .get_for(
                &key(),
                &Provenance::of(3, ConflictResolutionPolicy::LatestTimestampWins)
            )
            .is_none());
    }
}
