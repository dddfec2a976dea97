//! Error types for the aggregation engine.
//!
//! - [`MarketDataError`]: what a provider adapter returns for a single call
//! - [`ErrorKind`]: classification of a provider failure
//! - [`FetchError`]: what callers of the aggregator see
//! - [`AggregatedFailure`]: the structured report behind `AllProvidersExhausted`
//! - [`ConfigError`], [`SnapshotError`]: configuration and persistence failures

mod kind;

pub use kind::ErrorKind;

use std::time::Duration;

use thiserror::Error;

use crate::conflict::FieldConflict;
use crate::models::Operation;
use crate::registry::FetchDiagnostics;

/// Errors a provider adapter can return for one call.
///
/// These never reach the caller directly: the orchestrator records them and
/// moves on to the next candidate. Each variant maps to an [`ErrorKind`] via
/// [`kind`](Self::kind).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// The requested symbol was not found by the provider.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The provider does not implement this operation.
    #[error("Operation {operation} not supported by {provider}")]
    NotSupported { operation: String, provider: String },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited { provider: String },

    /// The provider is down, in maintenance, or its circuit is open.
    #[error("Provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    /// The call did not finish before its deadline.
    #[error("Timeout: {provider} after {timeout:?}")]
    ProviderTimeout { provider: String, timeout: Duration },

    /// The provider answered with a payload of the wrong shape or with
    /// values that fail validation.
    #[error("Invalid response from {provider}: {message}")]
    ProviderInvalidResponse { provider: String, message: String },

    /// Any other provider-side failure.
    #[error("Provider error: {provider} - {message}")]
    ProviderError { provider: String, message: String },
}

impl MarketDataError {
    /// Returns the failure classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use marketmux_market_data::errors::{ErrorKind, MarketDataError};
    ///
    /// let error = MarketDataError::RateLimited { provider: "YAHOO".to_string() };
    /// assert_eq!(error.kind(), ErrorKind::RateLimited);
    ///
    /// let error = MarketDataError::SymbolNotFound("INVALID".to_string());
    /// assert!(error.kind().is_benign());
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SymbolNotFound(_) => ErrorKind::NotFound,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ProviderUnavailable { .. } => ErrorKind::Unavailable,
            Self::ProviderTimeout { .. } => ErrorKind::Timeout,
            Self::ProviderInvalidResponse { .. } => ErrorKind::InvalidResponse,
            Self::ProviderError { .. } => ErrorKind::Upstream,
        }
    }
}

/// Structured report returned when no provider could serve a request.
///
/// Lists every provider that was considered, in the order it was considered,
/// with either the reason it was skipped or the last error it returned.
#[derive(Clone, Debug)]
pub struct AggregatedFailure {
    pub operation: Operation,
    pub diagnostics: FetchDiagnostics,
    pub elapsed: Duration,
    /// True when the chain-wide deadline cut the chain short.
    pub deadline_exceeded: bool,
}

impl AggregatedFailure {
    /// Last error from each provider that was actually attempted.
    pub fn errors(&self) -> Vec<(&str, &MarketDataError)> {
        self.diagnostics
            .errors()
            .into_iter()
            .map(|(id, e)| (id.as_ref(), e))
            .collect()
    }

    /// Number of providers actually called.
    pub fn attempted(&self) -> usize {
        self.diagnostics.attempted()
    }
}

impl std::fmt::Display for AggregatedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.diagnostics.attempts.is_empty() {
            return write!(f, "no provider serves {}", self.operation);
        }
        write!(f, "{} [{}]", self.operation, self.diagnostics.summary())?;
        if self.deadline_exceeded {
            write!(f, " (chain deadline exceeded after {:?})", self.elapsed)?;
        }
        Ok(())
    }
}

/// Errors surfaced to callers of the aggregator.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Every eligible provider failed, was circuit-open, or the chain deadline
    /// ran out.
    #[error("All providers exhausted: {0}")]
    AllProvidersExhausted(AggregatedFailure),

    /// Composite merge found disagreements and the policy asks for escalation.
    #[error("Conflict unresolved on {} field(s)", .0.len())]
    ConflictUnresolved(Vec<FieldConflict>),

    /// The request carried nothing to fetch.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled before a result was produced.
    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn aggregated_failure(&self) -> Option<&AggregatedFailure> {
        match self {
            Self::AllProvidersExhausted(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Invalid chain configuration or settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Provider chain is empty")]
    EmptyChain,

    #[error("Provider '{0}' appears more than once in the chain")]
    DuplicateProvider(String),

    #[error("Provider '{0}' has no registered adapter")]
    UnknownProvider(String),

    #[error("Timeout '{0}' must be greater than zero")]
    InvalidTimeout(&'static str),

    #[error("Invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },
}

/// Failure writing or reading a metrics snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
