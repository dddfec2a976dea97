//! The adapter contract every data source implements.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::errors::MarketDataError;
use crate::models::{FetchRequest, ProviderResponse};

use super::capabilities::ProviderCapabilities;

/// Trait for market data sources.
///
/// Adapters own everything vendor-specific (HTTP, auth, payload parsing,
/// rate limits). The aggregator only sees this uniform contract and decides
/// when each adapter is called based on its id, capabilities and the active
/// provider chain.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use marketmux_market_data::provider::{DataProvider, ProviderCapabilities};
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl DataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities::only(&[Operation::Historical, Operation::Realtime])
///     }
///
///     async fn fetch(
///         &self,
///         request: &FetchRequest,
///         deadline: Instant,
///     ) -> Result<ProviderResponse, MarketDataError> {
///         // ... call upstream before `deadline`
///     }
/// }
/// ```
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "YAHOO", "ALPHA_VANTAGE", etc.
    /// Used as the key for chain configuration, circuit breakers, health
    /// and cost tracking.
    fn id(&self) -> &'static str;

    /// Default priority rank when the chain does not set one.
    ///
    /// Lower values = higher priority.
    fn priority(&self) -> u8 {
        10
    }

    /// Operations this provider serves.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Serve one logical request.
    ///
    /// `deadline` is the latest instant the aggregator will wait; the call is
    /// abandoned after it regardless, so adapters may use it to size their
    /// own upstream timeouts.
    async fn fetch(
        &self,
        request: &FetchRequest,
        deadline: Instant,
    ) -> Result<ProviderResponse, MarketDataError>;

    /// Lightweight liveness check used by the background sweep before a
    /// breaker's recovery timeout elapses.
    async fn health_probe(&self) -> bool {
        true
    }
}
