//! Configuration.
//!
//! - `chain` - the provider chain, failover strategy, conflict policy and
//!   per-call overrides
//! - `settings` - engine tunables (breaker, health, cache, sweep) with
//!   environment overrides

mod chain;
mod settings;

pub use chain::{
    CallOptions, ConflictResolutionPolicy, EffectiveOptions, FailoverStrategy,
    ProviderChainConfig, ProviderIdentity,
};
pub use settings::AggregatorSettings;
