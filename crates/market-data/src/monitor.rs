//! Background maintenance sweep.
//!
//! A periodic task, independent of the request path, that:
//! - probes providers whose open circuit is about to admit a trial, so a
//!   dead provider keeps its circuit open and a live one is closed before
//!   the next real request arrives
//! - drops expired cache entries
//! - prunes stale health samples
//! - rolls old cost records into lifetime totals
//!
//! Everything it touches is the same synchronized state the hot path uses.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::registry::{CircuitState, FailoverOrchestrator};

/// Sweep cadence and probe window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Probe an open circuit once its recovery timeout is this close.
    pub probe_lead: Duration,
    /// Probes slower than this count as dead.
    pub probe_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_lead: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: Vec<String>,
    pub recovered: Vec<String>,
    pub purged_cache_entries: usize,
    pub pruned_samples: usize,
    pub rolled_up_cost_entries: usize,
}

/// Handle to a running sweep task.
#[derive(Debug)]
pub struct HealthSweepHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthSweepHandle {
    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the sweep and wait for the current pass to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!("Health sweep: task ended abnormally: {}", e);
        }
    }
}

/// Spawn the periodic sweep on the current tokio runtime.
pub fn start_health_sweep(
    orchestrator: Arc<FailoverOrchestrator>,
    cache: Arc<ResponseCache>,
    config: SweepConfig,
) -> HealthSweepHandle {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    let task = tokio::spawn(async move {
        info!("Health sweep started (every {:?})", config.interval);

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first sweep runs
        // one interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = run_sweep(&orchestrator, &cache, &config).await;
                    debug!("Health sweep: {:?}", report);
                }
                _ = token.cancelled() => {
                    info!("Health sweep stopped");
                    break;
                }
            }
        }
    });

    HealthSweepHandle { shutdown, task }
}

/// Run one sweep pass.
pub async fn run_sweep(
    orchestrator: &FailoverOrchestrator,
    cache: &ResponseCache,
    config: &SweepConfig,
) -> SweepReport {
    let mut report = SweepReport::default();
    let breaker = orchestrator.circuit_breaker();

    for provider in orchestrator.provider_ids() {
        if breaker.state(&provider) != CircuitState::Open {
            continue;
        }
        let due = breaker
            .time_until_half_open(&provider)
            .map(|left| left <= config.probe_lead)
            .unwrap_or(false);
        if !due {
            continue;
        }

        report.probed.push(provider.clone());
        match orchestrator.probe(&provider, config.probe_timeout).await {
            Some(true) => {
                info!("Health sweep: probe of '{}' succeeded", provider);
                breaker.record_success(&provider);
                report.recovered.push(provider);
            }
            Some(false) => {
                debug!("Health sweep: probe of '{}' failed, keeping circuit open", provider);
                breaker.record_failure(&provider);
            }
            None => {}
        }
    }

    report.purged_cache_entries = cache.purge_expired();
    report.pruned_samples = orchestrator.health().prune();
    report.rolled_up_cost_entries = orchestrator.costs().roll_up();
    report
}
