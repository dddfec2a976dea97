//! Per-attempt outcome records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::Operation;
use super::types::ProviderId;
use crate::errors::ErrorKind;

/// One provider call, as fed to the breaker, health monitor and cost tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub provider_id: ProviderId,
    pub operation: Operation,
    pub success: bool,
    #[serde(with = "latency_ms")]
    pub latency: Duration,
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl RequestOutcome {
    pub fn success(provider_id: ProviderId, operation: Operation, latency: Duration) -> Self {
        Self {
            provider_id,
            operation,
            success: true,
            latency,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        provider_id: ProviderId,
        operation: Operation,
        latency: Duration,
        kind: ErrorKind,
    ) -> Self {
        Self {
            provider_id,
            operation,
            success: false,
            latency,
            error_kind: Some(kind),
            timestamp: Utc::now(),
        }
    }

    /// The provider responded coherently, even if the answer was "not found".
    pub fn is_healthy(&self) -> bool {
        self.success || self.error_kind.map(|k| k.is_benign()).unwrap_or(false)
    }
}

mod latency_ms {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(ms / 1000.0).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn test_benign_failure_is_healthy() {
        let outcome = RequestOutcome::failure(
            Cow::Borrowed("YAHOO"),
            Operation::ValidateSymbols,
            Duration::from_millis(20),
            ErrorKind::NotFound,
        );
        assert!(!outcome.success);
        assert!(outcome.is_healthy());
    }

    #[test]
    fn test_timeout_is_unhealthy() {
        let outcome = RequestOutcome::failure(
            Cow::Borrowed("YAHOO"),
            Operation::Realtime,
            Duration::from_millis(150),
            ErrorKind::Timeout,
        );
        assert!(!outcome.is_healthy());
    }
}
