//! The public fetch interface.
//!
//! [`MarketDataAggregator`] ties the pieces together for every request:
//!
//! ```text
//! request -> normalize -> cache ---------------------------> result
//!                           | miss                             ^
//!                           v                                  |
//!                 failover orchestrator --(confirmation)--> conflict resolver
//!                   |      |       |
//!             breaker  health  cost tracker
//! ```
//!
//! The provider chain lives behind a single `Arc` that is swapped whole by
//! [`reconfigure_chain`](MarketDataAggregator::reconfigure_chain); a request
//! takes one snapshot of it up front and uses that snapshot throughout.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bulk::BulkOptimizer;
use crate::cache::{CacheConfig, CacheStats, CachedValue, Fingerprint, Provenance, ResponseCache};
use crate::config::{AggregatorSettings, CallOptions, ProviderChainConfig};
use crate::cost::{CostRecord, CostTracker};
use crate::errors::{ConfigError, FetchError, SnapshotError};
use crate::models::{DateRange, FetchRequest, FetchResult, Interval};
use crate::monitor::{start_health_sweep, HealthSweepHandle, SweepConfig};
use crate::provider::DataProvider;
use crate::registry::{
    CircuitBreaker, CircuitSnapshot, FailoverOrchestrator, FetchDiagnostics, HealthMonitor,
    ProviderHealth,
};
use crate::snapshot::MetricsSnapshot;

/// Health and breaker state of one provider, for dashboards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider_id: String,
    /// Display name from the active chain, if the provider is in it.
    pub name: Option<String>,
    pub priority: Option<u32>,
    pub in_chain: bool,
    pub health: ProviderHealth,
    pub circuit: CircuitSnapshot,
}

/// Multi-source market data facade.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct MarketDataAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    orchestrator: Arc<FailoverOrchestrator>,
    cache: Arc<ResponseCache>,
    cache_config: CacheConfig,
    chain: RwLock<Arc<ProviderChainConfig>>,
    settings: AggregatorSettings,
}

impl MarketDataAggregator {
    /// Build an aggregator with default settings.
    pub fn new(
        providers: Vec<Arc<dyn DataProvider>>,
        chain: ProviderChainConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_settings(providers, chain, AggregatorSettings::default())
    }

    /// Build an aggregator.
    ///
    /// Every chain member must have an adapter in `providers`; adapters not in
    /// the chain are allowed and become usable after a reconfiguration.
    pub fn with_settings(
        providers: Vec<Arc<dyn DataProvider>>,
        chain: ProviderChainConfig,
        settings: AggregatorSettings,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.id()) {
                return Err(ConfigError::DuplicateProvider(provider.id().to_string()));
            }
        }

        let orchestrator = FailoverOrchestrator::new(
            providers,
            Arc::new(CircuitBreaker::with_config(settings.circuit_breaker.clone())),
            Arc::new(HealthMonitor::with_config(settings.health.clone())),
            Arc::new(CostTracker::new(settings.cost_retention)),
        );
        check_chain(&orchestrator, &chain)?;
        register_rates(&orchestrator, &chain);

        info!(
            "Market data aggregator ready: chain {:?}, {} adapters",
            chain_ids(&chain),
            orchestrator.provider_ids().len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                orchestrator: Arc::new(orchestrator),
                cache: Arc::new(ResponseCache::new(settings.cache.enabled)),
                cache_config: settings.cache.clone(),
                chain: RwLock::new(Arc::new(chain)),
                settings,
            }),
        })
    }

    // ---- fetch operations ----

    pub async fn fetch_historical<S: AsRef<str>>(
        &self,
        symbols: &[S],
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<FetchResult, FetchError> {
        self.fetch(FetchRequest::historical(
            symbols,
            DateRange::new(start, end),
            interval,
        ))
        .await
    }

    pub async fn fetch_realtime<S: AsRef<str>>(
        &self,
        symbols: &[S],
    ) -> Result<FetchResult, FetchError> {
        self.fetch(FetchRequest::realtime(symbols)).await
    }

    /// Validate symbols, confirmed across the chain's `confirm_sources`
    /// providers and reconciled under its conflict policy.
    pub async fn validate_symbols<S: AsRef<str>>(
        &self,
        symbols: &[S],
    ) -> Result<FetchResult, FetchError> {
        let sources = self.chain().confirm_sources;
        self.fetch_with_options(
            FetchRequest::validate_symbols(symbols),
            &CallOptions::new().with_confirmation(sources),
        )
        .await
    }

    pub async fn search(&self, query: &str) -> Result<FetchResult, FetchError> {
        self.fetch(FetchRequest::search(query)).await
    }

    pub async fn fetch_fundamentals<S: AsRef<str>>(
        &self,
        symbols: &[S],
    ) -> Result<FetchResult, FetchError> {
        self.fetch(FetchRequest::fundamentals(symbols)).await
    }

    /// Fetch with the active chain's defaults.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResult, FetchError> {
        self.fetch_with_options(request, &CallOptions::default())
            .await
    }

    /// Fetch with explicit per-call overrides.
    pub async fn fetch_with_options(
        &self,
        request: FetchRequest,
        options: &CallOptions,
    ) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let request = request.normalized();
        if request.is_empty() {
            return Err(FetchError::InvalidRequest(format!(
                "{} request has nothing to fetch",
                request.operation()
            )));
        }

        let chain = self.chain();
        let effective = options.effective(&chain);
        let provenance = Provenance::of(effective.confirm_sources, effective.conflict_policy);

        let fingerprint = Fingerprint::of(&request);
        if options.cache_mode.reads() {
            if let Some(entry) = self.inner.cache.get_for(&fingerprint, &provenance) {
                debug!("Cache hit for {} ({})", request.operation(), fingerprint);
                return Ok(FetchResult {
                    data: entry.value.data,
                    source: entry.value.source,
                    sources: entry.value.sources,
                    as_of: entry.value.as_of,
                    from_cache: true,
                    conflicts: entry.value.conflicts,
                    diagnostics: FetchDiagnostics::new(),
                    elapsed: started.elapsed(),
                });
            }
        }

        if options
            .cancel
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
        {
            return Err(FetchError::Cancelled);
        }

        let orchestrator = &self.inner.orchestrator;

        let result = if effective.confirm_sources > 1 {
            let answers = orchestrator
                .execute_confirmed(&request, &chain, &effective, options.cancel.as_ref())
                .await?;
            let resolution = self
                .inner
                .settings
                .resolver
                .resolve(answers.responses, effective.conflict_policy)?;
            FetchResult {
                data: resolution.data,
                source: resolution.source,
                sources: resolution.sources,
                as_of: resolution.as_of,
                from_cache: false,
                conflicts: resolution.conflicts,
                diagnostics: answers.diagnostics,
                elapsed: started.elapsed(),
            }
        } else {
            let mut result = orchestrator
                .execute(&request, &chain, &effective, options.cancel.as_ref())
                .await?;
            result.elapsed = started.elapsed();
            result
        };

        if options.cache_mode.writes() {
            self.inner.cache.put(
                fingerprint,
                CachedValue {
                    data: result.data.clone(),
                    source: result.source.clone(),
                    sources: result.sources.clone(),
                    as_of: result.as_of,
                    conflicts: result.conflicts.clone(),
                    provenance,
                },
                self.inner.cache_config.ttl_for(request.operation()),
            );
        }

        Ok(result)
    }

    /// Fetch many requests, at most `max_concurrency` at a time.
    ///
    /// Results come back in input order, one per request.
    pub async fn bulk_fetch(
        &self,
        requests: Vec<FetchRequest>,
        max_concurrency: usize,
    ) -> Vec<Result<FetchResult, FetchError>> {
        self.bulk_fetch_with(requests, max_concurrency, CallOptions::default(), None)
            .await
    }

    /// [`bulk_fetch`](Self::bulk_fetch) with per-request overrides and a bulk
    /// cancellation token.
    ///
    /// Cancelling `cancel` stops dispatching new requests; requests already in
    /// flight finish normally. A token inside `options` is ignored for the
    /// same reason.
    pub async fn bulk_fetch_with(
        &self,
        requests: Vec<FetchRequest>,
        max_concurrency: usize,
        mut options: CallOptions,
        cancel: Option<CancellationToken>,
    ) -> Vec<Result<FetchResult, FetchError>> {
        options.cancel = None;
        let options = Arc::new(options);
        let aggregator = self.clone();

        BulkOptimizer::new(max_concurrency)
            .execute_many(requests, cancel, move |request| {
                let aggregator = aggregator.clone();
                let options = options.clone();
                async move { aggregator.fetch_with_options(request, &options).await }
            })
            .await
    }

    // ---- monitoring ----

    /// Health and breaker state for every chain member and registered adapter.
    ///
    /// Chain members come first in chain order, then the remaining adapters.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let chain = self.chain();
        let orchestrator = &self.inner.orchestrator;

        let mut statuses: Vec<ProviderStatus> = chain
            .providers
            .iter()
            .map(|identity| ProviderStatus {
                provider_id: identity.id.to_string(),
                name: Some(identity.name.clone()),
                priority: Some(identity.priority),
                in_chain: true,
                health: orchestrator.health().health_of(&identity.id),
                circuit: orchestrator.circuit_breaker().snapshot(&identity.id),
            })
            .collect();

        for id in orchestrator.provider_ids() {
            if chain.identity(&id).is_none() {
                statuses.push(ProviderStatus {
                    health: orchestrator.health().health_of(&id),
                    circuit: orchestrator.circuit_breaker().snapshot(&id),
                    provider_id: id,
                    name: None,
                    priority: None,
                    in_chain: false,
                });
            }
        }
        statuses
    }

    /// Per-provider calls, latency and cost over the last `window`.
    pub fn cost_report(&self, window: Duration) -> Vec<CostRecord> {
        self.inner.orchestrator.costs().report(window)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Current health, circuits and lifetime costs.
    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        let orchestrator = &self.inner.orchestrator;
        MetricsSnapshot {
            taken_at: Utc::now(),
            health: orchestrator.health().all(),
            circuits: orchestrator.circuit_breaker().snapshots(),
            costs: orchestrator.costs().lifetime(),
        }
    }

    pub fn write_metrics_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        self.snapshot_metrics().write_to(path)
    }

    /// Start the background sweep with the configured cadence.
    pub fn start_health_monitor(&self) -> HealthSweepHandle {
        start_health_sweep(
            self.inner.orchestrator.clone(),
            self.inner.cache.clone(),
            SweepConfig {
                interval: self.inner.settings.probe_interval,
                probe_lead: self.inner.settings.probe_lead,
                ..SweepConfig::default()
            },
        )
    }

    // ---- configuration ----

    /// The active provider chain.
    pub fn chain(&self) -> Arc<ProviderChainConfig> {
        self.inner
            .chain
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("Provider chain lock was poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    /// Atomically replace the provider chain.
    ///
    /// Requests already running keep the chain they started with. An invalid
    /// chain is rejected and the active one is left in place.
    pub fn reconfigure_chain(&self, chain: ProviderChainConfig) -> Result<(), ConfigError> {
        check_chain(&self.inner.orchestrator, &chain)?;
        register_rates(&self.inner.orchestrator, &chain);

        let ids = chain_ids(&chain);
        let mut active = self.inner.chain.write().unwrap_or_else(|poisoned| {
            warn!("Provider chain lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *active = Arc::new(chain);
        drop(active);

        info!("Provider chain reconfigured: {:?}", ids);
        Ok(())
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.inner.settings
    }

    // ---- maintenance ----

    /// Drop the cached answer for a request. Returns whether one was cached.
    pub fn invalidate(&self, request: &FetchRequest) -> bool {
        self.inner.cache.invalidate(&Fingerprint::of(request))
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn reset_circuit(&self, provider_id: &str) {
        self.inner.orchestrator.circuit_breaker().reset(provider_id);
    }

    pub fn reset_all_circuits(&self) {
        self.inner.orchestrator.circuit_breaker().reset_all();
    }
}

fn check_chain(
    orchestrator: &FailoverOrchestrator,
    chain: &ProviderChainConfig,
) -> Result<(), ConfigError> {
    chain.validate()?;
    for identity in &chain.providers {
        if orchestrator.provider(&identity.id).is_none() {
            return Err(ConfigError::UnknownProvider(identity.id.to_string()));
        }
    }
    Ok(())
}

fn register_rates(orchestrator: &FailoverOrchestrator, chain: &ProviderChainConfig) {
    for identity in &chain.providers {
        orchestrator
            .costs()
            .register_rate(&identity.id, identity.cost_per_call);
    }
}

fn chain_ids(chain: &ProviderChainConfig) -> Vec<String> {
    chain.providers.iter().map(|p| p.id.to_string()).collect()
}
