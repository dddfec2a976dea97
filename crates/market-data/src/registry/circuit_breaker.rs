//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent cascading failures
//! when a provider is experiencing issues. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are blocked until the recovery
//!   timeout elapses.
//! - **HalfOpen**: Testing recovery. Exactly one trial call is admitted; its
//!   success closes the circuit, its failure re-opens it and restarts the timer.
//!
//! Circuits are kept in a `DashMap`, so each provider is updated under its own
//! shard lock and unrelated providers never contend. State is in-memory and
//! resets on restart.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are blocked.
    Open,
    /// Testing recovery - a single trial request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Number of consecutive failures.
    failure_count: u32,
    /// Monotonic time of the last failure (drives the recovery timeout).
    last_failure: Option<Instant>,
    /// Wall-clock time of the last failure, for reporting.
    last_failure_at: Option<DateTime<Utc>>,
    /// Whether the single half-open trial slot is taken.
    trial_in_flight: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before admitting a trial call.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Per-provider circuit breaker.
pub struct CircuitBreaker {
    circuits: DashMap<String, Circuit>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    /// Create a closed circuit for a provider if it is not tracked yet.
    pub fn register(&self, provider: &str) {
        self.circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);
    }

    /// Check if a call to `provider` may be attempted now.
    ///
    /// - Closed: always true.
    /// - Open: false until the recovery timeout has elapsed; the first caller
    ///   after that moves the circuit to HalfOpen and takes the trial slot.
    /// - HalfOpen: true only for the caller that takes a free trial slot.
    pub fn is_call_allowed(&self, provider: &str) -> bool {
        self.admit(provider).is_some()
    }

    /// Like [`is_call_allowed`](Self::is_call_allowed), but returns a permit
    /// that releases a half-open trial slot if dropped without an outcome.
    pub fn try_acquire(&self, provider: &str) -> Option<CallPermit<'_>> {
        let trial = self.admit(provider)?;
        Some(CallPermit {
            breaker: self,
            provider: provider.to_string(),
            trial,
            settled: false,
        })
    }

    /// Admission decision under the provider's shard lock.
    /// `Some(true)` means the caller holds the half-open trial slot.
    fn admit(&self, provider: &str) -> Option<bool> {
        let mut circuit = self
            .circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => Some(false),
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    None
                } else {
                    circuit.trial_in_flight = true;
                    debug!("Circuit breaker: '{}' trial slot taken", provider);
                    Some(true)
                }
            }
            CircuitState::Open => {
                let recovered = circuit
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if !recovered {
                    return None;
                }
                info!(
                    "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                    provider
                );
                circuit.state = CircuitState::HalfOpen;
                circuit.trial_in_flight = true;
                Some(true)
            }
        }
    }

    /// Whether a call would currently be admitted, without taking a slot or
    /// changing state.
    pub fn would_allow(&self, provider: &str) -> bool {
        match self.circuits.get(provider) {
            None => true,
            Some(circuit) => match circuit.state {
                CircuitState::Closed => true,
                CircuitState::HalfOpen => !circuit.trial_in_flight,
                CircuitState::Open => circuit
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true),
            },
        }
    }

    /// Record a successful (or benign) response.
    ///
    /// Resets the failure count and closes the circuit, which also completes
    /// a half-open trial.
    pub fn record_success(&self, provider: &str) {
        let mut circuit = self
            .circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        if circuit.state != CircuitState::Closed {
            info!(
                "Circuit breaker: closing circuit for '{}' after successful trial",
                provider
            );
            circuit.last_failure = None;
        } else if circuit.failure_count > 0 {
            debug!(
                "Circuit breaker: success for '{}', failure count reset",
                provider
            );
        }

        circuit.state = CircuitState::Closed;
        circuit.failure_count = 0;
        circuit.trial_in_flight = false;
    }

    /// Record a failed request.
    ///
    /// Increments the failure count and opens the circuit once it reaches the
    /// threshold. A failure while HalfOpen re-opens immediately and restarts
    /// the recovery timer.
    pub fn record_failure(&self, provider: &str) {
        let mut circuit = self
            .circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.failure_count = circuit.failure_count.saturating_add(1);
        circuit.last_failure = Some(Instant::now());
        circuit.last_failure_at = Some(Utc::now());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        provider, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed trial",
                    provider
                );
                circuit.state = CircuitState::Open;
                circuit.trial_in_flight = false;
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
            }
        }
    }

    /// Free the half-open trial slot without recording an outcome.
    ///
    /// Used when a trial call is abandoned, so a later caller can trial again.
    pub fn release_trial(&self, provider: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(provider) {
            if circuit.state == CircuitState::HalfOpen && circuit.trial_in_flight {
                debug!("Circuit breaker: '{}' trial abandoned, slot released", provider);
                circuit.trial_in_flight = false;
            }
        }
    }

    /// Get the current state for a provider.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.circuits
            .get(provider)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the consecutive failure count for a provider.
    pub fn failure_count(&self, provider: &str) -> u32 {
        self.circuits
            .get(provider)
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    /// Time left before an open circuit admits a trial. `None` unless Open.
    pub fn time_until_half_open(&self, provider: &str) -> Option<Duration> {
        let circuit = self.circuits.get(provider)?;
        if circuit.state != CircuitState::Open {
            return None;
        }
        let elapsed = circuit.last_failure.map(|t| t.elapsed()).unwrap_or_default();
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Reset the circuit for a provider to Closed state.
    pub fn reset(&self, provider: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(provider) {
            info!(
                "Circuit breaker: manually resetting circuit for '{}'",
                provider
            );
            *circuit = Circuit::new();
        }
    }

    /// Reset all circuits to their initial state.
    pub fn reset_all(&self) {
        for mut circuit in self.circuits.iter_mut() {
            *circuit = Circuit::new();
        }
        info!("Circuit breaker: all circuits reset");
    }

    /// Snapshot of one provider's circuit.
    pub fn snapshot(&self, provider: &str) -> CircuitSnapshot {
        match self.circuits.get(provider) {
            Some(circuit) => self.to_snapshot(provider, &circuit),
            None => self.to_snapshot(provider, &Circuit::new()),
        }
    }

    /// Snapshots for all tracked providers, sorted by provider id.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| self.to_snapshot(entry.key(), entry.value()))
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    fn to_snapshot(&self, provider: &str, circuit: &Circuit) -> CircuitSnapshot {
        CircuitSnapshot {
            provider: provider.to_string(),
            state: circuit.state,
            failure_count: circuit.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: u64::try_from(self.config.recovery_timeout.as_millis())
                .unwrap_or(u64::MAX),
            last_failure: circuit.last_failure,
            last_failure_at: circuit.last_failure_at,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission to call a provider, handed out by [`CircuitBreaker::try_acquire`].
///
/// Dropping a trial permit without recording an outcome frees the half-open
/// slot.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    provider: String,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit holds the half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success(&self.provider);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(&self.provider);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial(&self.provider);
        }
    }
}

/// Point-in-time view of a provider's circuit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    #[serde(skip)]
    pub last_failure: Option<Instant>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
        })
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new();

        assert!(cb.is_call_allowed("TEST_PROVIDER"));
        assert_eq!(cb.state("TEST_PROVIDER"), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = breaker(3, Duration::from_secs(60));
        let provider = "FAILING_PROVIDER";

        cb.record_failure(provider);
        cb.record_failure(provider);
        assert!(cb.is_call_allowed(provider));
        assert_eq!(cb.state(provider), CircuitState::Closed);

        cb.record_failure(provider);
        assert!(!cb.is_call_allowed(provider));
        assert_eq!(cb.state(provider), CircuitState::Open);
        assert!(cb.time_until_half_open(provider).is_some());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(60));
        let provider = "INTERMITTENT_PROVIDER";

        cb.record_failure(provider);
        cb.record_failure(provider);
        assert_eq!(cb.failure_count(provider), 2);

        cb.record_success(provider);
        assert_eq!(cb.failure_count(provider), 0);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let cb = breaker(1, Duration::from_millis(10));
        let provider = "RECOVERING_PROVIDER";

        cb.record_failure(provider);
        assert!(!cb.is_call_allowed(provider));
        assert!(!cb.would_allow(provider));

        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.would_allow(provider));
        assert_eq!(cb.state(provider), CircuitState::Open);
        assert!(cb.is_call_allowed(provider));
        assert_eq!(cb.state(provider), CircuitState::HalfOpen);
        assert!(!cb.would_allow(provider));
        assert!(!cb.is_call_allowed(provider));
        assert!(!cb.is_call_allowed(provider));
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let cb = breaker(1, Duration::from_millis(10));
        let provider = "HEALING_PROVIDER";

        cb.record_failure(provider);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_call_allowed(provider));

        cb.record_success(provider);
        assert_eq!(cb.state(provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(provider), 0);
        assert!(cb.is_call_allowed(provider));
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = breaker(1, Duration::from_millis(30));
        let provider = "RELAPSING_PROVIDER";

        cb.record_failure(provider);
        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.is_call_allowed(provider));
        assert_eq!(cb.state(provider), CircuitState::HalfOpen);

        cb.record_failure(provider);
        assert_eq!(cb.state(provider), CircuitState::Open);
        assert!(!cb.is_call_allowed(provider));
    }

    #[test]
    fn test_dropped_trial_permit_releases_slot() {
        let cb = breaker(1, Duration::from_millis(10));
        let provider = "ABANDONED_PROVIDER";

        cb.record_failure(provider);
        std::thread::sleep(Duration::from_millis(20));

        let permit = cb.try_acquire(provider).expect("trial permit");
        assert!(permit.is_trial());
        assert!(cb.try_acquire(provider).is_none());

        drop(permit);
        assert_eq!(cb.state(provider), CircuitState::HalfOpen);
        let permit = cb.try_acquire(provider).expect("slot released");
        permit.record_success();
        assert_eq!(cb.state(provider), CircuitState::Closed);
    }

    #[test]
    fn test_manual_reset() {
        let cb = breaker(1, Duration::from_secs(60));
        let provider = "RESET_PROVIDER";

        cb.record_failure(provider);
        assert_eq!(cb.state(provider), CircuitState::Open);

        cb.reset(provider);
        assert_eq!(cb.state(provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(provider), 0);
    }

    #[test]
    fn test_reset_all() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure("A");
        cb.record_failure("B");

        cb.reset_all();
        assert_eq!(cb.state("A"), CircuitState::Closed);
        assert_eq!(cb.state("B"), CircuitState::Closed);
    }

    #[test]
    fn test_provider_isolation() {
        let cb = breaker(1, Duration::from_secs(60));

        cb.record_failure("PROVIDER_A");
        assert!(!cb.is_call_allowed("PROVIDER_A"));

        assert!(cb.is_call_allowed("PROVIDER_B"));
        assert_eq!(cb.state("PROVIDER_B"), CircuitState::Closed);
    }

    #[test]
    fn test_snapshots() {
        let cb = CircuitBreaker::new();
        cb.register("METRIC_C");
        cb.record_failure("METRIC_A");
        cb.record_failure("METRIC_A");
        cb.record_failure("METRIC_B");

        let snapshots = cb.snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].provider, "METRIC_A");
        assert_eq!(snapshots[0].failure_count, 2);
        assert_eq!(snapshots[0].state, CircuitState::Closed);
        assert!(snapshots[0].last_failure_at.is_some());
        assert!(snapshots[2].last_failure_at.is_none());
    }

    #[test]
    fn test_concurrent_trial_has_single_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let cb = Arc::new(breaker(1, Duration::from_millis(10)));
        cb.record_failure("CONTENDED");
        std::thread::sleep(Duration::from_millis(20));

        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if cb.is_call_allowed("CONTENDED") {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
