//! Skip reason tracking for provider selection diagnostics.

use std::time::Duration;

use crate::errors::MarketDataError;
use crate::models::ProviderId;

/// Why a provider was skipped without being called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Provider doesn't declare support for this operation.
    NotSupported,

    /// Provider is in the chain but no adapter is registered for it.
    NotRegistered,

    /// Circuit breaker is open (or its half-open trial is taken).
    CircuitOpen,

    /// The chain-wide deadline ran out before this provider's turn.
    DeadlineExceeded,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSupported => write!(f, "operation not supported"),
            Self::NotRegistered => write!(f, "no adapter registered"),
            Self::CircuitOpen => write!(f, "circuit open"),
            Self::DeadlineExceeded => write!(f, "chain deadline exceeded"),
        }
    }
}

/// Record of a single provider during a fetch.
#[derive(Clone, Debug)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub skipped: Option<SkipReason>,
    /// Last error returned by the provider, if it was called and failed.
    pub error: Option<MarketDataError>,
    /// Calls made against this provider (0 when skipped, 2 after a retry).
    pub tries: u32,
    /// Time spent across all tries.
    pub latency: Duration,
    pub success: bool,
}

/// Ordered record of every provider considered for one request.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: Some(reason),
            error: None,
            tries: 0,
            latency: Duration::ZERO,
            success: false,
        });
    }

    pub fn record_error(
        &mut self,
        provider_id: ProviderId,
        error: MarketDataError,
        tries: u32,
        latency: Duration,
    ) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: Some(error),
            tries,
            latency,
            success: false,
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId, tries: u32, latency: Duration) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: None,
            tries,
            latency,
            success: true,
        });
    }

    /// Appends another request's attempts, as when several providers are
    /// queried concurrently for confirmation.
    pub fn extend(&mut self, other: FetchDiagnostics) {
        self.attempts.extend(other.attempts);
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.provider_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({})", a.provider_id, skip)
                } else if let Some(err) = &a.error {
                    format!("{}: ERROR x{} ({})", a.provider_id, a.tries, err)
                } else {
                    format!("{}: UNKNOWN", a.provider_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Check if any provider succeeded.
    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Number of providers that were actually called.
    pub fn attempted(&self) -> usize {
        self.attempts.iter().filter(|a| a.tries > 0).count()
    }

    /// Get all skip reasons.
    pub fn skip_reasons(&self) -> Vec<(&ProviderId, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skipped.as_ref().map(|s| (&a.provider_id, s)))
            .collect()
    }

    /// Get the last error of each failed provider.
    pub fn errors(&self) -> Vec<(&ProviderId, &MarketDataError)> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| (&a.provider_id, e)))
            .collect()
    }

    pub fn attempt(&self, provider_id: &str) -> Option<&ProviderAttempt> {
        self.attempts.iter().find(|a| a.provider_id == provider_id)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn timeout(provider: &str) -> MarketDataError {
        MarketDataError::ProviderTimeout {
            provider: provider.to_string(),
            timeout: Duration::from_millis(150),
        }
    }

    #[test]
    fn test_diagnostics_summary() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(Cow::Borrowed("YAHOO"), SkipReason::CircuitOpen);
        diag.record_error(
            Cow::Borrowed("ALPHA"),
            timeout("ALPHA"),
            2,
            Duration::from_millis(300),
        );
        diag.record_success(Cow::Borrowed("MARKETDATA"), 1, Duration::from_millis(40));

        let summary = diag.summary();
        assert!(summary.contains("YAHOO: SKIPPED (circuit open)"));
        assert!(summary.contains("ALPHA: ERROR x2"));
        assert!(summary.contains("MARKETDATA: SUCCESS"));
    }

    #[test]
    fn test_has_success() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(Cow::Borrowed("YAHOO"), SkipReason::CircuitOpen);
        assert!(!diag.has_success());

        diag.record_success(Cow::Borrowed("ALPHA"), 1, Duration::ZERO);
        assert!(diag.has_success());
    }

    #[test]
    fn test_skipped_providers_are_not_attempts() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(Cow::Borrowed("A"), SkipReason::CircuitOpen);
        diag.record_skip(Cow::Borrowed("B"), SkipReason::NotSupported);
        diag.record_error(Cow::Borrowed("C"), timeout("C"), 1, Duration::ZERO);

        assert_eq!(diag.skip_reasons().len(), 2);
        assert_eq!(diag.attempted(), 1);
        assert_eq!(diag.errors().len(), 1);
        assert_eq!(diag.attempt("C").map(|a| a.tries), Some(1));
    }
}
