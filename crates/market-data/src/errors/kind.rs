use serde::{Deserialize, Serialize};

/// Coarse classification of a provider failure.
///
/// Carried in every `RequestOutcome` so the circuit breaker, health monitor
/// and cost tracker agree on what happened without inspecting messages.
///
/// | Kind | Counts against breaker? | Retried under retry-once? |
/// |------|-------------------------|---------------------------|
/// | `Unavailable` | Yes | Yes |
/// | `Timeout` | Yes | Yes |
/// | `InvalidResponse` | Yes | Yes |
/// | `RateLimited` | Yes | Yes |
/// | `Upstream` | Yes | Yes |
/// | `NotFound` | No | No |
/// | `NotSupported` | No | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider reported itself unavailable or its circuit is open.
    Unavailable,
    /// The call did not complete before its deadline.
    Timeout,
    /// The payload was malformed or did not match the request.
    InvalidResponse,
    /// The provider throttled the request.
    RateLimited,
    /// Any other upstream failure.
    Upstream,
    /// The provider answered, but does not know the requested symbol.
    NotFound,
    /// The provider answered, but does not serve this operation.
    NotSupported,
}

impl ErrorKind {
    /// The provider responded coherently; the request was the problem.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound | Self::NotSupported)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::RateLimited => "rate_limited",
            Self::Upstream => "upstream",
            Self::NotFound => "not_found",
            Self::NotSupported => "not_supported",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
