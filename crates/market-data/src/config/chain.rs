//! Provider chain configuration and per-call overrides.
//!
//! A [`ProviderChainConfig`] is an immutable value: the aggregator holds it
//! behind an `Arc` and replaces the whole pointer on reconfiguration, so an
//! in-flight request always sees one complete chain.

use std::collections::HashSet;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheMode;
use crate::errors::ConfigError;
use crate::models::{Operation, ProviderId};
use crate::provider::{DataProvider, ProviderCapabilities};

/// Default per-call timeout.
const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_millis(300);

/// Default wall-clock budget for the whole chain.
const DEFAULT_CHAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of providers queried for multi-source confirmation.
const DEFAULT_CONFIRM_SOURCES: usize = 2;

/// A provider as it appears in a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub id: ProviderId,

    /// Human-readable name for dashboards.
    pub name: String,

    /// Declared priority rank. Lower values = higher priority.
    pub priority: u32,

    #[serde(default)]
    pub capabilities: ProviderCapabilities,

    /// Estimated cost of a single upstream call, in the account currency.
    #[serde(default)]
    pub cost_per_call: Decimal,
}

impl ProviderIdentity {
    pub fn new(id: impl Into<ProviderId>, name: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            capabilities: ProviderCapabilities::all(),
            cost_per_call: Decimal::ZERO,
        }
    }

    /// Identity derived from what an adapter declares about itself.
    pub fn from_provider(provider: &dyn DataProvider) -> Self {
        Self {
            id: ProviderId::Borrowed(provider.id()),
            name: provider.id().to_string(),
            priority: u32::from(provider.priority()),
            capabilities: provider.capabilities(),
            cost_per_call: Decimal::ZERO,
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_cost_per_call(mut self, cost: Decimal) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.capabilities.supports(operation)
    }
}

/// What the orchestrator does after a provider call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStrategy {
    /// Move to the next candidate immediately.
    #[default]
    FastFail,
    /// Retry the same provider once, then move on.
    RetryOnce,
}

impl FailoverStrategy {
    /// Maximum number of calls made against one provider per request.
    pub fn max_tries(&self) -> u32 {
        match self {
            Self::FastFail => 1,
            Self::RetryOnce => 2,
        }
    }
}

/// How answers from several providers are reconciled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ConflictResolutionPolicy {
    /// Keep the answer of the highest-priority provider that answered.
    #[default]
    PrimaryWins,
    /// Keep the answer with the most recent data timestamp.
    LatestTimestampWins,
    /// Merge field-level data and flag disagreements.
    CompositeMerge {
        /// Fail with `ConflictUnresolved` instead of returning flagged conflicts.
        #[serde(default)]
        escalate_on_conflict: bool,
    },
}

/// The ordered provider chain and how it is walked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderChainConfig {
    pub providers: Vec<ProviderIdentity>,

    #[serde(default)]
    pub strategy: FailoverStrategy,

    #[serde(with = "duration_ms", default = "default_per_call_timeout")]
    pub per_call_timeout: Duration,

    /// Budget for the whole chain, distinct from the per-call timeout.
    #[serde(with = "duration_ms", default = "default_chain_timeout")]
    pub chain_timeout: Duration,

    #[serde(default)]
    pub conflict_policy: ConflictResolutionPolicy,

    /// Providers queried concurrently when a caller asks for confirmation.
    #[serde(default = "default_confirm_sources")]
    pub confirm_sources: usize,
}

fn default_per_call_timeout() -> Duration {
    DEFAULT_PER_CALL_TIMEOUT
}

fn default_chain_timeout() -> Duration {
    DEFAULT_CHAIN_TIMEOUT
}

fn default_confirm_sources() -> usize {
    DEFAULT_CONFIRM_SOURCES
}

impl ProviderChainConfig {
    pub fn new(providers: Vec<ProviderIdentity>) -> Self {
        Self {
            providers,
            strategy: FailoverStrategy::default(),
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
            chain_timeout: DEFAULT_CHAIN_TIMEOUT,
            conflict_policy: ConflictResolutionPolicy::default(),
            confirm_sources: DEFAULT_CONFIRM_SOURCES,
        }
    }

    pub fn with_strategy(mut self, strategy: FailoverStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    pub fn with_chain_timeout(mut self, timeout: Duration) -> Self {
        self.chain_timeout = timeout;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_confirm_sources(mut self, sources: usize) -> Self {
        self.confirm_sources = sources;
        self
    }

    pub fn identity(&self, provider_id: &str) -> Option<&ProviderIdentity> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    /// Structural checks that do not need the adapter registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::EmptyChain);
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_ref()) {
                return Err(ConfigError::DuplicateProvider(provider.id.to_string()));
            }
        }

        if self.per_call_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("per_call_timeout"));
        }
        if self.chain_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("chain_timeout"));
        }
        Ok(())
    }
}

/// Explicit per-call overrides. Unset fields inherit from the active chain.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub strategy: Option<FailoverStrategy>,
    pub per_call_timeout: Option<Duration>,
    pub chain_timeout: Option<Duration>,
    pub conflict_policy: Option<ConflictResolutionPolicy>,

    /// Query this many providers concurrently and resolve their answers.
    /// `None` or `Some(1)` uses plain failover.
    pub confirm_sources: Option<usize>,

    pub cache_mode: CacheMode,

    /// Cancelling the token abandons in-flight provider calls for this request.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: FailoverStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = Some(timeout);
        self
    }

    pub fn with_chain_timeout(mut self, timeout: Duration) -> Self {
        self.chain_timeout = Some(timeout);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    pub fn with_confirmation(mut self, sources: usize) -> Self {
        self.confirm_sources = Some(sources);
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Overrides folded over the chain defaults.
    pub fn effective(&self, chain: &ProviderChainConfig) -> EffectiveOptions {
        EffectiveOptions {
            strategy: self.strategy.unwrap_or(chain.strategy),
            per_call_timeout: self.per_call_timeout.unwrap_or(chain.per_call_timeout),
            chain_timeout: self.chain_timeout.unwrap_or(chain.chain_timeout),
            conflict_policy: self.conflict_policy.unwrap_or(chain.conflict_policy),
            confirm_sources: self.confirm_sources.unwrap_or(1).max(1),
        }
    }
}

/// Fully-resolved options for one orchestrated call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveOptions {
    pub strategy: FailoverStrategy,
    pub per_call_timeout: Duration,
    pub chain_timeout: Duration,
    pub conflict_policy: ConflictResolutionPolicy,
    pub confirm_sources: usize,
}

/// Serializes `Duration` as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
