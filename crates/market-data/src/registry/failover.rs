//! Failover orchestration across the provider chain.
//!
//! For one logical request the orchestrator:
//! 1. Keeps the chain providers declaring support for the operation
//! 2. Orders them with the health monitor's ranking
//! 3. Skips providers whose circuit is open
//! 4. Calls each remaining provider under `min(per-call timeout, chain deadline)`
//! 5. Validates the payload
//! 6. Records the outcome in the breaker, health monitor and cost tracker
//! 7. Returns the first accepted answer, or an `AggregatedFailure`
//!
//! Provider errors never escape as errors of their own: they are recorded in
//! the request's `FetchDiagnostics` and drive failover to the next candidate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::CircuitBreaker;
use super::health::HealthMonitor;
use super::skip_reason::{FetchDiagnostics, SkipReason};
use super::validator::PayloadValidator;
use crate::config::{EffectiveOptions, ProviderChainConfig, ProviderIdentity};
use crate::conflict::SourcedResponse;
use crate::cost::CostTracker;
use crate::errors::{AggregatedFailure, FetchError, MarketDataError};
use crate::models::{FetchRequest, FetchResult, ProviderResponse, RequestOutcome};
use crate::provider::DataProvider;

/// Outcome of calling one provider (with its retry, if any).
enum Attempt {
    Success {
        response: ProviderResponse,
        tries: u32,
        latency: Duration,
    },
    Failed {
        error: MarketDataError,
        tries: u32,
        latency: Duration,
    },
    Skipped(SkipReason),
    Cancelled,
}

/// Stand-in for "no deadline" when a timeout overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + timeout`, saturating to a far-future instant on overflow.
fn deadline_after(from: Instant, timeout: Duration) -> Instant {
    from.checked_add(timeout)
        .unwrap_or_else(|| from + FAR_FUTURE)
}

enum CallResult {
    Done(Result<ProviderResponse, MarketDataError>),
    Cancelled,
}

/// Answers gathered for multi-source confirmation.
#[derive(Debug)]
pub struct ConfirmedAnswers {
    /// Accepted answers in candidate order.
    pub responses: Vec<SourcedResponse>,
    pub diagnostics: FetchDiagnostics,
    pub elapsed: Duration,
}

/// Walks a provider chain for one request at a time.
pub struct FailoverOrchestrator {
    providers: HashMap<String, Arc<dyn DataProvider>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<HealthMonitor>,
    costs: Arc<CostTracker>,
    validator: PayloadValidator,
}

impl FailoverOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn DataProvider>>,
        circuit_breaker: Arc<CircuitBreaker>,
        health: Arc<HealthMonitor>,
        costs: Arc<CostTracker>,
    ) -> Self {
        let providers: HashMap<String, Arc<dyn DataProvider>> = providers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();

        for id in providers.keys() {
            circuit_breaker.register(id);
            health.register(id);
        }

        Self {
            providers,
            circuit_breaker,
            health,
            costs,
            validator: PayloadValidator::new(),
        }
    }

    pub fn with_validator(mut self, validator: PayloadValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn provider(&self, provider_id: &str) -> Option<&Arc<dyn DataProvider>> {
        self.providers.get(provider_id)
    }

    /// Ids of all registered adapters, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn costs(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    /// Try candidates in rank order until one answers.
    pub async fn execute(
        &self,
        request: &FetchRequest,
        chain: &ProviderChainConfig,
        options: &EffectiveOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let chain_deadline = deadline_after(started, options.chain_timeout);
        let mut diagnostics = FetchDiagnostics::new();

        let candidates = self.candidates(request, chain, &mut diagnostics);
        let answer = self
            .walk(request, candidates.iter(), options, chain_deadline, cancel, &mut diagnostics)
            .await?;

        match answer {
            Some((identity, response)) => {
                if diagnostics.attempts.iter().any(|a| a.tries > 0 && !a.success) {
                    info!(
                        "Failover: {} served by '{}' after [{}]",
                        request.operation(),
                        identity.id,
                        diagnostics.summary()
                    );
                }
                Ok(FetchResult::single(
                    identity.id.clone(),
                    response,
                    diagnostics,
                    started.elapsed(),
                ))
            }
            None => Err(self.exhausted(request, diagnostics, started, chain_deadline)),
        }
    }

    /// Query up to `options.confirm_sources` providers concurrently.
    ///
    /// The highest-ranked providers whose circuit admits a call are queried at
    /// once and joined. If none of them answers, the remaining candidates are
    /// tried one by one as in [`execute`](Self::execute).
    pub async fn execute_confirmed(
        &self,
        request: &FetchRequest,
        chain: &ProviderChainConfig,
        options: &EffectiveOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConfirmedAnswers, FetchError> {
        let started = Instant::now();
        let chain_deadline = deadline_after(started, options.chain_timeout);
        let mut diagnostics = FetchDiagnostics::new();

        let candidates = self.candidates(request, chain, &mut diagnostics);
        let (selected, rest): (Vec<_>, Vec<_>) = {
            let mut selected = Vec::new();
            let mut rest = Vec::new();
            for identity in candidates {
                if selected.len() < options.confirm_sources
                    && self.providers.contains_key(identity.id.as_ref())
                    && self.circuit_breaker.would_allow(&identity.id)
                {
                    selected.push(identity);
                } else {
                    rest.push(identity);
                }
            }
            (selected, rest)
        };

        debug!(
            "Confirmation: querying {:?} concurrently",
            selected.iter().map(|p| p.id.as_ref()).collect::<Vec<_>>()
        );

        let attempts = join_all(selected.iter().map(|identity| {
            self.attempt(identity, request, options, chain_deadline, cancel)
        }))
        .await;

        let mut responses = Vec::new();
        for (identity, attempt) in selected.iter().zip(attempts) {
            match attempt {
                Attempt::Success {
                    response,
                    tries,
                    latency,
                } => {
                    diagnostics.record_success(identity.id.clone(), tries, latency);
                    responses.push(SourcedResponse {
                        provider_id: identity.id.clone(),
                        priority: identity.priority,
                        response,
                    });
                }
                Attempt::Failed {
                    error,
                    tries,
                    latency,
                } => diagnostics.record_error(identity.id.clone(), error, tries, latency),
                Attempt::Skipped(reason) => diagnostics.record_skip(identity.id.clone(), reason),
                Attempt::Cancelled => return Err(FetchError::Cancelled),
            }
        }

        if responses.is_empty() {
            if let Some((identity, response)) = self
                .walk(request, rest.iter(), options, chain_deadline, cancel, &mut diagnostics)
                .await?
            {
                responses.push(SourcedResponse {
                    provider_id: identity.id.clone(),
                    priority: identity.priority,
                    response,
                });
            }
        }

        if responses.is_empty() {
            return Err(self.exhausted(request, diagnostics, started, chain_deadline));
        }

        Ok(ConfirmedAnswers {
            responses,
            diagnostics,
            elapsed: started.elapsed(),
        })
    }

    /// Probe a provider's liveness outside the request path.
    ///
    /// Returns `None` when no adapter is registered under `provider_id`. A
    /// probe that outlives `timeout` counts as dead.
    pub async fn probe(&self, provider_id: &str, timeout: Duration) -> Option<bool> {
        let provider = self.providers.get(provider_id)?;
        match tokio::time::timeout(timeout, provider.health_probe()).await {
            Ok(alive) => Some(alive),
            Err(_) => Some(false),
        }
    }

    /// Supporting chain members in rank order. Unsupported ones are recorded
    /// as skipped.
    fn candidates(
        &self,
        request: &FetchRequest,
        chain: &ProviderChainConfig,
        diagnostics: &mut FetchDiagnostics,
    ) -> Vec<ProviderIdentity> {
        let operation = request.operation();
        let mut supporting = Vec::with_capacity(chain.providers.len());
        for identity in &chain.providers {
            if identity.supports(operation) {
                supporting.push(identity.clone());
            } else {
                diagnostics.record_skip(identity.id.clone(), SkipReason::NotSupported);
            }
        }
        self.health.current_ranking(&supporting)
    }

    /// Sequential failover over `candidates`.
    async fn walk<'a>(
        &self,
        request: &FetchRequest,
        candidates: impl Iterator<Item = &'a ProviderIdentity>,
        options: &EffectiveOptions,
        chain_deadline: Instant,
        cancel: Option<&CancellationToken>,
        diagnostics: &mut FetchDiagnostics,
    ) -> Result<Option<(&'a ProviderIdentity, ProviderResponse)>, FetchError> {
        for identity in candidates {
            if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
                return Err(FetchError::Cancelled);
            }
            if Instant::now() >= chain_deadline {
                diagnostics.record_skip(identity.id.clone(), SkipReason::DeadlineExceeded);
                continue;
            }

            match self
                .attempt(identity, request, options, chain_deadline, cancel)
                .await
            {
                Attempt::Success {
                    response,
                    tries,
                    latency,
                } => {
                    diagnostics.record_success(identity.id.clone(), tries, latency);
                    return Ok(Some((identity, response)));
                }
                Attempt::Failed {
                    error,
                    tries,
                    latency,
                } => {
                    diagnostics.record_error(identity.id.clone(), error, tries, latency);
                }
                Attempt::Skipped(reason) => {
                    debug!("Skipping provider '{}': {}", identity.id, reason);
                    diagnostics.record_skip(identity.id.clone(), reason);
                }
                Attempt::Cancelled => return Err(FetchError::Cancelled),
            }
        }
        Ok(None)
    }

    /// Call one provider, retrying once under `RetryOnce`.
    async fn attempt(
        &self,
        identity: &ProviderIdentity,
        request: &FetchRequest,
        options: &EffectiveOptions,
        chain_deadline: Instant,
        cancel: Option<&CancellationToken>,
    ) -> Attempt {
        let Some(provider) = self.providers.get(identity.id.as_ref()) else {
            return Attempt::Skipped(SkipReason::NotRegistered);
        };
        let operation = request.operation();
        let max_tries = options.strategy.max_tries();

        let mut tries = 0;
        let mut spent = Duration::ZERO;
        let mut last_error: Option<MarketDataError> = None;

        while tries < max_tries {
            // A retry is only made if the breaker still admits the provider.
            let Some(permit) = self.circuit_breaker.try_acquire(&identity.id) else {
                if tries == 0 {
                    return Attempt::Skipped(SkipReason::CircuitOpen);
                }
                break;
            };

            let now = Instant::now();
            if now >= chain_deadline {
                drop(permit);
                if tries == 0 {
                    return Attempt::Skipped(SkipReason::DeadlineExceeded);
                }
                break;
            }
            let call_deadline = deadline_after(now, options.per_call_timeout).min(chain_deadline);
            tries += 1;

            let call_started = Instant::now();
            let result = self
                .call(provider.as_ref(), request, call_deadline, cancel)
                .await;
            let latency = call_started.elapsed();
            spent += latency;

            let result = match result {
                // The permit is dropped unsettled, releasing a trial slot.
                CallResult::Cancelled => return Attempt::Cancelled,
                CallResult::Done(result) => result.and_then(|response| {
                    self.validator
                        .validate(provider.id(), operation, &response.data)
                        .map(|()| response)
                }),
            };

            match result {
                Ok(response) => {
                    permit.record_success();
                    self.record_outcome(RequestOutcome::success(
                        identity.id.clone(),
                        operation,
                        latency,
                    ));
                    debug!(
                        "Provider '{}' served {} in {:?}",
                        identity.id, operation, latency
                    );
                    return Attempt::Success {
                        response,
                        tries,
                        latency: spent,
                    };
                }
                Err(error) => {
                    let kind = error.kind();
                    self.record_outcome(RequestOutcome::failure(
                        identity.id.clone(),
                        operation,
                        latency,
                        kind,
                    ));

                    if kind.is_benign() {
                        // The provider answered coherently; nothing to retry.
                        permit.record_success();
                        debug!("Provider '{}' answered {}: {}", identity.id, kind, error);
                        return Attempt::Failed {
                            error,
                            tries,
                            latency: spent,
                        };
                    }

                    permit.record_failure();
                    warn!(
                        "Provider '{}' failed {} (try {}/{}): {}",
                        identity.id, operation, tries, max_tries, error
                    );
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) => Attempt::Failed {
                error,
                tries,
                latency: spent,
            },
            None => Attempt::Skipped(SkipReason::CircuitOpen),
        }
    }

    /// One adapter call bounded by `deadline` and the caller's cancellation.
    async fn call(
        &self,
        provider: &dyn DataProvider,
        request: &FetchRequest,
        deadline: Instant,
        cancel: Option<&CancellationToken>,
    ) -> CallResult {
        let started = Instant::now();
        let timed = tokio::time::timeout_at(deadline, provider.fetch(request, deadline));

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return CallResult::Cancelled,
                    outcome = timed => outcome,
                }
            }
            None => timed.await,
        };

        CallResult::Done(match outcome {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::ProviderTimeout {
                provider: provider.id().to_string(),
                timeout: deadline.saturating_duration_since(started),
            }),
        })
    }

    fn record_outcome(&self, outcome: RequestOutcome) {
        self.health.record_outcome(&outcome);
        self.costs.record(&outcome);
    }

    fn exhausted(
        &self,
        request: &FetchRequest,
        diagnostics: FetchDiagnostics,
        started: Instant,
        chain_deadline: Instant,
    ) -> FetchError {
        let deadline_exceeded = Instant::now() >= chain_deadline
            || diagnostics
                .skip_reasons()
                .iter()
                .any(|(_, r)| **r == SkipReason::DeadlineExceeded);

        let failure = AggregatedFailure {
            operation: request.operation(),
            diagnostics,
            elapsed: started.elapsed(),
            deadline_exceeded,
        };
        warn!("All providers exhausted: {}", failure);
        FetchError::AllProvidersExhausted(failure)
    }
}
