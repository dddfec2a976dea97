//! Engine tunables and their environment overrides.

use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::conflict::ConflictResolver;
use crate::errors::ConfigError;
use crate::registry::{CircuitBreakerConfig, HealthConfig};

/// How long cost records stay itemized before `roll_up` folds them.
const DEFAULT_COST_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Period of the background health sweep.
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// How close to its recovery an open breaker must be before it is probed.
const DEFAULT_PROBE_LEAD: Duration = Duration::from_secs(5);

/// Engine-wide settings, fixed for the lifetime of an aggregator.
#[derive(Clone, Debug)]
pub struct AggregatorSettings {
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub cache: CacheConfig,
    pub cost_retention: Duration,
    pub probe_interval: Duration,
    pub probe_lead: Duration,
    /// Reconciles answers when a request is confirmed across providers.
    pub resolver: ConflictResolver,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
            cost_retention: DEFAULT_COST_RETENTION,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_lead: DEFAULT_PROBE_LEAD,
            resolver: ConflictResolver::default(),
        }
    }
}

impl AggregatorSettings {
    /// Defaults overridden by `MMX_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their default; set but unparsable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = parse(&lookup, "MMX_BREAKER_FAILURE_THRESHOLD")? {
            settings.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse(&lookup, "MMX_BREAKER_RECOVERY_SECS")? {
            settings.circuit_breaker.recovery_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "MMX_HEALTH_WINDOW")? {
            settings.health.window_size = v;
        }
        if let Some(v) = parse::<f64, _>(&lookup, "MMX_HEALTH_DEMOTION_THRESHOLD")? {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::InvalidSetting {
                    key: "MMX_HEALTH_DEMOTION_THRESHOLD".to_string(),
                    message: format!("{} is outside [0, 1]", v),
                });
            }
            settings.health.demotion_threshold = v;
        }
        if let Some(v) = parse(&lookup, "MMX_CACHE_ENABLED")? {
            settings.cache.enabled = v;
        }
        if let Some(v) = parse(&lookup, "MMX_CACHE_REALTIME_TTL_SECS")? {
            settings.cache.realtime_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "MMX_CACHE_HISTORICAL_TTL_SECS")? {
            settings.cache.historical_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "MMX_PROBE_INTERVAL_SECS")? {
            if v == 0 {
                return Err(ConfigError::InvalidSetting {
                    key: "MMX_PROBE_INTERVAL_SECS".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            settings.probe_interval = Duration::from_secs(v);
        }

        if settings.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "MMX_BREAKER_FAILURE_THRESHOLD".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if settings.health.window_size == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "MMX_HEALTH_WINDOW".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(settings)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidSetting {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let settings = AggregatorSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            settings.circuit_breaker.recovery_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(settings.health.window_size, 50);
        assert!(settings.cache.enabled);
        assert_eq!(settings.probe_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_applied() {
        let settings = AggregatorSettings::from_lookup(lookup(&[
            ("MMX_BREAKER_FAILURE_THRESHOLD", "3"),
            ("MMX_BREAKER_RECOVERY_SECS", "60"),
            ("MMX_HEALTH_DEMOTION_THRESHOLD", "0.4"),
            ("MMX_CACHE_ENABLED", "false"),
            ("MMX_CACHE_REALTIME_TTL_SECS", " 5 "),
        ]))
        .unwrap();

        assert_eq!(settings.circuit_breaker.failure_threshold, 3);
        assert_eq!(
            settings.circuit_breaker.recovery_timeout,
            Duration::from_secs(60)
        );
        assert_eq!(settings.health.demotion_threshold, 0.4);
        assert!(!settings.cache.enabled);
        assert_eq!(settings.cache.realtime_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_unparsable_value_is_error() {
        let err = AggregatorSettings::from_lookup(lookup(&[("MMX_HEALTH_WINDOW", "fifty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == "MMX_HEALTH_WINDOW"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = AggregatorSettings::from_lookup(lookup(&[("MMX_BREAKER_FAILURE_THRESHOLD", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn test_demotion_threshold_out_of_range() {
        let err =
            AggregatorSettings::from_lookup(lookup(&[("MMX_HEALTH_DEMOTION_THRESHOLD", "1.5")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }
}
