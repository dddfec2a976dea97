//! Rolling provider health and ranking.
//!
//! Every completed provider call is recorded as a sample in a per-provider
//! window bounded both by count and by age. Latency and success rate are
//! recomputed from that window only, so a provider that improves recovers
//! its score without waiting for all-time totals to catch up.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::ProviderIdentity;
use crate::models::RequestOutcome;

const DEFAULT_WINDOW_SIZE: usize = 50;
const DEFAULT_MAX_SAMPLE_AGE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_DEMOTION_THRESHOLD: f64 = 0.5;
const DEFAULT_MIN_SAMPLES: usize = 3;
const DEFAULT_LATENCY_REFERENCE: Duration = Duration::from_secs(1);

/// Weight of success rate in the health score; latency gets the rest.
const SUCCESS_WEIGHT: f64 = 0.8;

/// Health monitor configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthConfig {
    /// Maximum samples kept per provider.
    pub window_size: usize,
    /// Samples older than this are ignored.
    pub max_sample_age: Duration,
    /// Providers scoring below this are ranked behind healthier ones.
    pub demotion_threshold: f64,
    /// A provider is never demoted on fewer samples than this.
    pub min_samples: usize,
    /// Latency at which the latency component of the score is halved.
    pub latency_reference: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_sample_age: DEFAULT_MAX_SAMPLE_AGE,
            demotion_threshold: DEFAULT_DEMOTION_THRESHOLD,
            min_samples: DEFAULT_MIN_SAMPLES,
            latency_reference: DEFAULT_LATENCY_REFERENCE,
        }
    }
}

/// Provider health status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Scoring at or above the demotion threshold.
    Healthy,
    /// Scoring below the demotion threshold on enough samples.
    Degraded,
    /// Too few recent samples to judge.
    Unknown,
}

/// Health of one provider, derived from its recent samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: HealthStatus,
    /// Score in [0, 1]; higher is healthier.
    pub score: f64,
    /// Share of recent calls that got a coherent response.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub sample_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Health score for a success rate and average latency.
///
/// Increases with success rate and decreases with latency; both components
/// are in [0, 1] so the score is too.
///
/// ```
/// use std::time::Duration;
/// use marketmux_market_data::registry::health_score;
///
/// let reference = Duration::from_secs(1);
/// let fast = health_score(1.0, Duration::from_millis(50), reference);
/// let slow = health_score(1.0, Duration::from_millis(900), reference);
/// let failing = health_score(0.2, Duration::from_millis(50), reference);
/// assert!(fast > slow);
/// assert!(slow > failing);
/// ```
pub fn health_score(success_rate: f64, avg_latency: Duration, reference: Duration) -> f64 {
    let success_rate = success_rate.clamp(0.0, 1.0);
    let latency = avg_latency.as_secs_f64();
    let reference = reference.as_secs_f64().max(f64::EPSILON);
    let latency_component = reference / (latency + reference);
    SUCCESS_WEIGHT * success_rate + (1.0 - SUCCESS_WEIGHT) * latency_component
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    at: Instant,
    healthy: bool,
    latency: Duration,
}

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<Sample>,
    last_updated: Option<DateTime<Utc>>,
    demoted: bool,
}

/// Tracks rolling health per provider and ranks candidates.
pub struct HealthMonitor {
    windows: DashMap<String, Window>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Start tracking a provider with an empty window.
    pub fn register(&self, provider: &str) {
        self.windows.entry(provider.to_string()).or_default();
    }

    /// Add a completed call to its provider's window.
    pub fn record_outcome(&self, outcome: &RequestOutcome) {
        let mut window = self
            .windows
            .entry(outcome.provider_id.to_string())
            .or_default();

        window.samples.push_back(Sample {
            at: Instant::now(),
            healthy: outcome.is_healthy(),
            latency: outcome.latency,
        });
        while window.samples.len() > self.config.window_size {
            window.samples.pop_front();
        }
        window.last_updated = Some(outcome.timestamp);

        let health = self.compute(&outcome.provider_id, &window);
        let demoted = health.status == HealthStatus::Degraded;
        if demoted != window.demoted {
            if demoted {
                info!(
                    "Health: '{}' degraded (score {:.2}, success {:.0}%)",
                    outcome.provider_id,
                    health.score,
                    health.success_rate * 100.0
                );
            } else {
                info!(
                    "Health: '{}' recovered (score {:.2})",
                    outcome.provider_id, health.score
                );
            }
            window.demoted = demoted;
        }
    }

    /// Current health of a provider. Unknown providers score 1.0.
    pub fn health_of(&self, provider: &str) -> ProviderHealth {
        match self.windows.get(provider) {
            Some(window) => self.compute(provider, &window),
            None => self.compute(provider, &Window::default()),
        }
    }

    /// Health of every tracked provider, sorted by provider id.
    pub fn all(&self) -> Vec<ProviderHealth> {
        let mut all: Vec<_> = self
            .windows
            .iter()
            .map(|entry| self.compute(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        all
    }

    /// Order candidates for a request.
    ///
    /// Candidates are sorted by declared priority, ties broken by score. A
    /// provider whose score is below the demotion threshold (on at least
    /// `min_samples` recent samples) is moved behind every healthy one, but
    /// keeps its relative order among the other degraded providers.
    pub fn current_ranking(&self, candidates: &[ProviderIdentity]) -> Vec<ProviderIdentity> {
        let mut scored: Vec<(ProviderIdentity, ProviderHealth)> = candidates
            .iter()
            .map(|c| (c.clone(), self.health_of(&c.id)))
            .collect();

        scored.sort_by(|(a, ha), (b, hb)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| hb.score.total_cmp(&ha.score))
        });

        let (healthy, degraded): (Vec<_>, Vec<_>) = scored
            .into_iter()
            .partition(|(_, health)| health.status != HealthStatus::Degraded);

        if !degraded.is_empty() && !healthy.is_empty() {
            debug!(
                "Health: demoting {:?} behind healthier providers",
                degraded.iter().map(|(p, _)| p.id.as_ref()).collect::<Vec<_>>()
            );
        }

        healthy
            .into_iter()
            .chain(degraded)
            .map(|(identity, _)| identity)
            .collect()
    }

    /// Drop samples older than the window age. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        for mut window in self.windows.iter_mut() {
            let before = window.samples.len();
            window
                .samples
                .retain(|s| s.at.elapsed() <= self.config.max_sample_age);
            removed += before - window.samples.len();
        }
        removed
    }

    /// Forget all samples for a provider.
    pub fn reset(&self, provider: &str) {
        if let Some(mut window) = self.windows.get_mut(provider) {
            *window = Window::default();
        }
    }

    fn compute(&self, provider: &str, window: &Window) -> ProviderHealth {
        let recent: Vec<&Sample> = window
            .samples
            .iter()
            .filter(|s| s.at.elapsed() <= self.config.max_sample_age)
            .collect();

        if recent.is_empty() {
            return ProviderHealth {
                provider_id: provider.to_string(),
                status: HealthStatus::Unknown,
                score: 1.0,
                success_rate: 1.0,
                avg_latency_ms: 0.0,
                sample_count: 0,
                last_updated: window.last_updated,
            };
        }

        let count = recent.len();
        let healthy = recent.iter().filter(|s| s.healthy).count();
        let success_rate = healthy as f64 / count as f64;
        let total_latency: Duration = recent.iter().map(|s| s.latency).sum();
        let avg_latency = total_latency / count as u32;
        let score = health_score(success_rate, avg_latency, self.config.latency_reference);

        let status = if count < self.config.min_samples {
            HealthStatus::Unknown
        } else if score < self.config.demotion_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        ProviderHealth {
            provider_id: provider.to_string(),
            status,
            score,
            success_rate,
            avg_latency_ms: avg_latency.as_secs_f64() * 1000.0,
            sample_count: count,
            last_updated: window.last_updated,
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
