//! Metrics snapshot to disk.
//!
//! Health, circuit and cost aggregates can be written out as JSON so a
//! dashboard or a restarted process can look at them. Nothing in the engine
//! reads a snapshot back on its own.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::cost::CostRecord;
use crate::errors::SnapshotError;
use crate::registry::{CircuitSnapshot, ProviderHealth};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub health: Vec<ProviderHealth>,
    pub circuits: Vec<CircuitSnapshot>,
    pub costs: Vec<CostRecord>,
}

impl MetricsSnapshot {
    /// Write the snapshot as pretty JSON.
    ///
    /// The file is written next to `path` first and renamed into place, so
    /// readers never see a partial snapshot.
    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, path)?;

        debug!(
            "Metrics snapshot written to {} ({} providers)",
            path.display(),
            self.health.len()
        );
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CircuitState, HealthStatus};
    use rust_decimal_macros::dec;

    fn snapshot() -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            taken_at: now,
            health: vec![ProviderHealth {
                provider_id: "YAHOO".to_string(),
                status: HealthStatus::Healthy,
                score: 0.93,
                success_rate: 1.0,
                avg_latency_ms: 120.0,
                sample_count: 12,
                last_updated: Some(now),
            }],
            circuits: vec![CircuitSnapshot {
                provider: "YAHOO".to_string(),
                state: CircuitState::Open,
                failure_count: 5,
                failure_threshold: 5,
                recovery_timeout_ms: 300_000,
                last_failure: None,
                last_failure_at: Some(now),
            }],
            costs: vec![CostRecord {
                provider_id: "YAHOO".to_string(),
                calls: 12,
                failures: 0,
                avg_latency_ms: 120.0,
                estimated_cost: dec!(0.12),
                window_start: now,
                window_end: now,
            }],
        }
    }

    #[test]
    fn test_snapshot_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics").join("snapshot.json");

        snapshot().write_to(&path).unwrap();
        let loaded = MetricsSnapshot::read_from(&path).unwrap();

        assert_eq!(loaded.health, snapshot().health);
        assert_eq!(loaded.circuits[0].state, CircuitState::Open);
        assert_eq!(loaded.costs[0].calls, 12);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetricsSnapshot::read_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));
    }

    #[test]
    fn test_garbage_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let err = MetricsSnapshot::read_from(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::Encoding(_)));
    }
}
