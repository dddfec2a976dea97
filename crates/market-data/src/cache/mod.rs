//! Response cache.
//!
//! - `fingerprint` - deterministic keys from normalized requests
//! - `store` - the concurrent TTL store with lazy expiry

mod fingerprint;
mod store;

pub use fingerprint::Fingerprint;
pub use store::{CacheConfig, CacheEntry, CacheStats, CachedValue, Provenance, ResponseCache};

/// How a single call interacts with the response cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise fetch and write the result to the cache. (Default)
    #[default]
    Use,
    /// Always fetch, bypassing any cached entry, and write the new result.
    Refresh,
    /// Always fetch and neither read from nor write to the cache.
    Bypass,
}

impl CacheMode {
    pub fn reads(&self) -> bool {
        matches!(self, Self::Use)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, Self::Bypass)
    }
}
