// crates/dcyfr-daemon/src/health.rs
// Weighted aggregation of scanner results into a health snapshot

use crate::state;
use chrono::{DateTime, Duration, Utc};
use dcyfr_types::{
    HealthSnapshot, HealthStatus, OverallHealth, ScanResult, ScanStatus, ScannerHealth,
    WorkspaceHealth,
};
use std::collections::BTreeMap;
use std::path::Path;

/// Score tier thresholds
fn classify(score: f64) -> HealthStatus {
    if score >= 90.0 {
        HealthStatus::Healthy
    } else if score >= 70.0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Critical
    }
}

/// Component score for one result, or `None` when the scanner was skipped.
///
/// A `compliance` metric wins over a `usage` metric, which wins over the
/// status mapping.
fn component_score(result: &ScanResult) -> Option<f64> {
    if let Some(&compliance) = result.metrics.get("compliance") {
        return Some(compliance);
    }
    if let Some(&usage) = result.metrics.get("usage") {
        return Some(usage);
    }
    match result.status {
        ScanStatus::Pass => Some(100.0),
        ScanStatus::Warn => Some(70.0),
        ScanStatus::Fail => Some(30.0),
        ScanStatus::Error => Some(0.0),
        ScanStatus::Skipped => None,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Pure transform from scanner results to a snapshot.
///
/// The overall score is the weighted mean over non-skipped scanners;
/// `weights` maps scanner ids to integer weights, default 1.
pub fn build_snapshot(
    results: &[ScanResult],
    weights: &BTreeMap<String, u32>,
    packages: usize,
) -> HealthSnapshot {
    let mut scanners = BTreeMap::new();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0u64;
    let mut last_scan_duration_ms = 0u64;
    let mut latest: Option<DateTime<Utc>> = None;

    for result in results {
        let score = match component_score(result) {
            Some(score) => score,
            None => continue,
        };
        let weight = u64::from(*weights.get(&result.scanner).unwrap_or(&1));
        weighted_sum += score * weight as f64;
        weight_total += weight;

        if latest.is_none_or(|t| result.timestamp > t) {
            latest = Some(result.timestamp);
            last_scan_duration_ms = result.duration_ms;
        }

        scanners.insert(
            result.scanner.clone(),
            ScannerHealth {
                score: round1(score),
                status: result.status,
                last_run: result.timestamp,
                violations_count: result.violations.len(),
                warnings_count: result.warnings.len(),
                metrics: result.metrics.clone(),
                summary: result.summary.clone(),
            },
        );
    }

    let overall_score = if weight_total == 0 {
        100.0
    } else {
        round1(weighted_sum / weight_total as f64)
    };

    HealthSnapshot {
        timestamp: Utc::now(),
        overall: OverallHealth {
            score: overall_score,
            status: classify(overall_score),
        },
        scanners,
        workspace: WorkspaceHealth {
            packages,
            last_scan_duration_ms,
        },
    }
}

/// Persist the latest snapshot to `health.json`.
pub fn save_snapshot(path: &Path, snapshot: &HealthSnapshot) {
    if let Err(e) = state::write_json(path, snapshot) {
        tracing::warn!("Failed to persist health snapshot: {}", e);
    }
}

pub fn load_snapshot(path: &Path) -> Option<HealthSnapshot> {
    state::read_json(path)
}

/// Append a snapshot to the rolling history, trimming entries older than the
/// retention window. A corrupt history file restarts from empty.
pub fn append_history(path: &Path, snapshot: &HealthSnapshot, retention_days: i64) {
    let mut history: Vec<HealthSnapshot> = state::read_json(path).unwrap_or_default();
    history.push(snapshot.clone());

    let cutoff = Utc::now() - Duration::days(retention_days);
    history.retain(|entry| entry.timestamp >= cutoff);

    if let Err(e) = state::write_json(path, &history) {
        tracing::warn!("Failed to persist health history: {}", e);
    }
}

pub fn load_history(path: &Path) -> Vec<HealthSnapshot> {
    state::read_json(path).unwrap_or_default()
}
