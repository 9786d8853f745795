// crates/dcyfr-daemon/src/config/mod.rs
// Configuration and shared constants

pub mod defaults;
pub mod ignore;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the guardian daemon.
///
/// Built from compiled-in defaults, then overridden by `DCYFR_*` environment
/// variables. Everything is resolved once at startup; components receive the
/// values they need via construction.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Absolute path of the workspace being guarded.
    pub workspace_root: PathBuf,
    /// Maximum tasks executing at once. The per-scanner limit of one running
    /// task is enforced independently of this value.
    pub max_concurrent: usize,
    /// Queued tasks older than this are expired without running.
    pub task_ttl: Duration,
    /// How long the stop sequence waits for in-flight work.
    pub drain_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Resident-set threshold for `daemon:memory-warning`.
    pub memory_warn_mb: u64,
    pub log_max_bytes: u64,
    pub log_max_files: usize,
    /// Default watcher debounce for rules that do not set their own.
    pub debounce_default: Duration,
    pub history_retention_days: i64,
    /// Header line every source file must carry for `license-headers`.
    pub license_header: String,
    /// Per-scanner health weights; scanners not listed weigh 1.
    pub health_weights: BTreeMap<String, u32>,
}

impl GuardianConfig {
    /// Defaults for a workspace, without env overrides.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            max_concurrent: 1,
            task_ttl: Duration::from_secs(60 * 60),
            drain_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            memory_warn_mb: 512,
            log_max_bytes: 5 * 1024 * 1024,
            log_max_files: 5,
            debounce_default: Duration::from_millis(500),
            history_retention_days: 90,
            license_header: "Copyright (c) dcyfr".to_string(),
            health_weights: defaults::default_health_weights(),
        }
    }

    /// Defaults plus `DCYFR_*` environment overrides.
    pub fn from_env(workspace_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(workspace_root);

        if let Some(n) = read_u64("DCYFR_MAX_CONCURRENT") {
            config.max_concurrent = (n as usize).max(1);
        }
        if let Some(secs) = read_u64("DCYFR_TASK_TTL_SECS") {
            config.task_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("DCYFR_DRAIN_TIMEOUT_SECS") {
            config.drain_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("DCYFR_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(mb) = read_u64("DCYFR_MEMORY_WARN_MB") {
            config.memory_warn_mb = mb;
        }
        if let Some(bytes) = read_u64("DCYFR_LOG_MAX_BYTES") {
            config.log_max_bytes = bytes;
        }
        if let Some(ms) = read_u64("DCYFR_DEBOUNCE_MS") {
            config.debounce_default = Duration::from_millis(ms);
        }
        if let Some(days) = read_u64("DCYFR_HISTORY_RETENTION_DAYS") {
            config.history_retention_days = days as i64;
        }
        if let Ok(header) = std::env::var("DCYFR_LICENSE_HEADER") {
            if !header.trim().is_empty() {
                config.license_header = header;
            }
        }

        config
    }
}

/// Read a numeric env var, ignoring unset, empty, or unparsable values.
fn read_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<u64>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring {}: '{}' is not a number", name, raw);
                None
            }
        },
        _ => None,
    }
}
