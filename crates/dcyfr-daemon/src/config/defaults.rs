// crates/dcyfr-daemon/src/config/defaults.rs
// Built-in schedule table, watcher rules, and health weights

use crate::watcher::WatchRule;
use std::collections::BTreeMap;
use std::time::Duration;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Compiled-in schedule defaults. Persisted overrides contribute only
/// `lastRun`/`nextRun`/`enabled`; everything else comes from this table.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleDefault {
    pub id: &'static str,
    pub name: &'static str,
    pub scanner: &'static str,
    pub interval_ms: u64,
    pub enabled: bool,
}

pub const DEFAULT_SCHEDULES: &[ScheduleDefault] = &[
    ScheduleDefault {
        id: "hourly-license-check",
        name: "License header sweep",
        scanner: "license-headers",
        interval_ms: HOUR_MS,
        enabled: true,
    },
    ScheduleDefault {
        id: "todo-sweep",
        name: "TODO marker sweep",
        scanner: "todo-comments",
        interval_ms: 6 * HOUR_MS,
        enabled: true,
    },
    ScheduleDefault {
        id: "unimplemented-sweep",
        name: "Unimplemented block sweep",
        scanner: "unimplemented-blocks",
        interval_ms: 6 * HOUR_MS,
        enabled: true,
    },
    ScheduleDefault {
        id: "daily-audit",
        name: "Dependency advisory audit",
        scanner: "dependency-audit",
        interval_ms: 24 * HOUR_MS,
        enabled: true,
    },
    ScheduleDefault {
        id: "daily-doc-coverage",
        name: "Doc coverage check",
        scanner: "doc-coverage",
        interval_ms: 24 * HOUR_MS,
        enabled: false,
    },
];

/// Default reactive rules mapping changed paths to scanners.
pub fn default_watch_rules(debounce_default: Duration) -> Vec<WatchRule> {
    vec![
        WatchRule::new(
            r"\.rs$",
            &["todo-comments", "unimplemented-blocks"],
            Some(debounce_default),
        ),
        WatchRule::new(
            r"(^|/)Cargo\.(toml|lock)$",
            &["dependency-audit"],
            Some(Duration::from_millis(2000)),
        ),
        WatchRule::new(
            r"\.(rs|ts|tsx|js|jsx|py|go)$",
            &["license-headers"],
            Some(debounce_default),
        ),
    ]
}

/// Health weights per scanner id; anything absent weighs 1.
pub fn default_health_weights() -> BTreeMap<String, u32> {
    let mut weights = BTreeMap::new();
    weights.insert("dependency-audit".to_string(), 3);
    weights.insert("license-headers".to_string(), 2);
    weights.insert("unimplemented-blocks".to_string(), 2);
    weights.insert("todo-comments".to_string(), 1);
    weights.insert("doc-coverage".to_string(), 1);
    weights
}
