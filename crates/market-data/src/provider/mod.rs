//! Data provider abstractions.
//!
//! This module contains:
//! - The `DataProvider` trait that all adapters implement
//! - `ProviderCapabilities`, the static declaration of supported operations
//!
//! Concrete adapters live in the embedding application; the aggregator is
//! provider-agnostic and only ever talks to `Arc<dyn DataProvider>`.

mod capabilities;
mod traits;

pub use capabilities::ProviderCapabilities;
pub use traits::DataProvider;
