//! MarketMux Market Data Crate
//!
//! This crate aggregates market data from several independent, unreliable
//! sources behind one highly-available fetch interface.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Historical bars, real-time quotes, symbol validation, search and fundamentals
//! - Ordered provider chains with fast-fail or retry-once failover
//! - Per-provider circuit breaking and rolling health ranking
//! - Response caching keyed by normalized request fingerprints
//! - Multi-source confirmation with configurable conflict resolution
//! - Bounded-concurrency bulk fetches and per-provider cost reporting
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! |      Caller      | --> |   FetchRequest   |  (normalized logical request)
//! +------------------+     +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  ResponseCache   |  (hit returns immediately)
//!                          +------------------+
//!                                  | miss
//!                                  v
//!                       +----------------------+
//!                       | FailoverOrchestrator |  (health ranking, breakers,
//!                       +----------------------+   deadlines, validation)
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |   DataProvider   |  (adapters supplied by the host)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |   FetchResult    |  (data tagged with its source)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`MarketDataAggregator`] - The public fetch facade
//! - [`DataProvider`] - Adapter contract implemented per data source
//! - [`ProviderChainConfig`] - Ordered providers, strategy, timeouts and conflict policy
//! - [`CallOptions`] - Per-call overrides
//! - [`FetchResult`] / [`FetchError`] - What callers get back
//!
//! # Type Aliases
//!
//! - [`ProviderId`] - Provider identifier (e.g., "YAHOO", "ALPHA_VANTAGE")

pub mod aggregator;
pub mod bulk;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod cost;
pub mod errors;
pub mod models;
pub mod monitor;
pub mod provider;
pub mod registry;
pub mod snapshot;

pub use aggregator::{MarketDataAggregator, ProviderStatus};

pub use models::{
    Bar, DateRange, FetchRequest, FetchResult, Fundamentals, Interval, MarketData, Operation,
    ProviderId, ProviderResponse, Quote, RequestOutcome, SearchResult, SymbolValidation,
};

pub use config::{
    AggregatorSettings, CallOptions, ConflictResolutionPolicy, FailoverStrategy,
    ProviderChainConfig, ProviderIdentity,
};

pub use errors::{
    AggregatedFailure, ConfigError, ErrorKind, FetchError, MarketDataError, SnapshotError,
};

pub use provider::{DataProvider, ProviderCapabilities};

pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FailoverOrchestrator, FetchDiagnostics,
    HealthConfig, HealthMonitor, HealthStatus, ProviderAttempt, ProviderHealth, SkipReason,
};

pub use cache::{CacheConfig, CacheMode, Fingerprint, Provenance, ResponseCache};
pub use conflict::{ConflictResolver, FieldConflict};
pub use cost::{CostRecord, CostTracker};
pub use monitor::HealthSweepHandle;
pub use snapshot::MetricsSnapshot;
