//! Market data models
//!
//! - `types` - Type aliases for common identifiers (ProviderId)
//! - `operation` - The logical operations providers can serve
//! - `request` - Logical requests (FetchRequest) and their normalization
//! - `bar`, `quote`, `validation`, `search`, `fundamentals` - Payload records
//! - `payload` - Payload envelope (MarketData), adapter responses and fetch results
//! - `outcome` - Per-attempt outcome records (RequestOutcome)

mod bar;
mod fundamentals;
mod operation;
mod outcome;
mod payload;
mod quote;
mod request;
mod search;
mod types;
mod validation;

pub use bar::Bar;
pub use fundamentals::Fundamentals;
pub use operation::Operation;
pub use outcome::RequestOutcome;
pub use payload::{FetchResult, MarketData, ProviderResponse};
pub use quote::Quote;
pub use request::{DateRange, FetchRequest, Interval};
pub use search::SearchResult;
pub use types::ProviderId;
pub use validation::SymbolValidation;
