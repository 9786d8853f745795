// crates/dcyfr-types/src/lib.rs

//! Shared data contracts between the dcyfr guardian daemon and its clients.
//!
//! This crate provides the core domain model for:
//! - **Scanner results**: violations, warnings, metrics, statuses
//! - **Tasks**: queued scanner invocations with priority and provenance
//! - **Schedules**: periodic scanner triggers with persisted run markers
//! - **Health**: weighted aggregation of scanner outcomes
//!
//! Everything here serializes with camelCase field names; these shapes are
//! the on-disk format under `.dcyfr/` and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Short stable identifier of a scanner (e.g. `"license-headers"`).
pub type ScannerId = String;

// ===================================================
// SCANNER CONTRACT
// ===================================================

/// Functional area a scanner belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerCategory {
    Compliance,
    Security,
    Documentation,
    Cleanup,
    Testing,
    Governance,
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Outcome classification of one scanner run.
///
/// `Error` is reserved for execution failures (the scanner itself blew up or
/// a tool invocation failed), never for finding violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pass,
    Warn,
    Fail,
    Error,
    Skipped,
}

/// A single finding reported by a scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Human-readable hint describing how to resolve the finding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default)]
    pub auto_fixable: bool,
}

impl Violation {
    pub fn new(id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            severity,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            fix: None,
            auto_fixable: false,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

/// Immutable view a scanner receives for one invocation.
///
/// `files` present means "scope this invocation to these files"; absent
/// means a full workspace scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanContext {
    pub workspace_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub verbose: bool,
}

impl ScanContext {
    /// Full-workspace scan context with no scoping.
    pub fn full(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            files: None,
            project: None,
            options: None,
            dry_run: false,
            verbose: false,
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = Some(files);
        self
    }
}

/// What one scanner run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub scanner: ScannerId,
    pub status: ScanStatus,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Violation>,
    /// Named numeric metrics (`compliance`, `usage`, `count`, ...).
    pub metrics: BTreeMap<String, f64>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

impl ScanResult {
    /// Result shell with status derived later; timestamp is set now.
    pub fn new(scanner: impl Into<String>) -> Self {
        Self {
            scanner: scanner.into(),
            status: ScanStatus::Pass,
            violations: Vec::new(),
            warnings: Vec::new(),
            metrics: BTreeMap::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
            summary: String::new(),
        }
    }

    /// Execution-failure result (`status=error`), used when a scanner throws.
    pub fn execution_error(scanner: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::new(scanner);
        result.status = ScanStatus::Error;
        result.summary = message.into();
        result
    }

    /// Derive `pass`/`warn`/`fail` from the recorded findings.
    pub fn finalize_status(&mut self) {
        self.status = if !self.violations.is_empty() {
            ScanStatus::Fail
        } else if !self.warnings.is_empty() {
            ScanStatus::Warn
        } else {
            ScanStatus::Pass
        };
    }
}

/// Outcome of a `fix` invocation over auto-fixable violations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub scanner: ScannerId,
    pub fixed: usize,
    pub failed: usize,
    #[serde(default)]
    pub messages: Vec<String>,
}

// ===================================================
// TASKS
// ===================================================

/// Execution priority; lower numeric value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// Which trigger produced a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Scheduler,
    Watcher,
    Cli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Expired,
}

/// One queued scanner invocation. Owned exclusively by the task queue from
/// enqueue to archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub scanner: ScannerId,
    pub priority: TaskPriority,
    pub source: TaskSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(
        scanner: impl Into<String>,
        source: TaskSource,
        priority: TaskPriority,
        files: Option<Vec<PathBuf>>,
        options: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scanner: scanner.into(),
            priority,
            source,
            files,
            options,
            created_at: Utc::now(),
            status: TaskStatus::Queued,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Age of the task relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// True when this task targets the same scanner with the same file scope.
    pub fn same_request(&self, scanner: &str, files: &Option<Vec<PathBuf>>) -> bool {
        self.scanner == scanner && file_sets_equal(&self.files, files)
    }
}

/// Set-equality over optional file scopes. Both-absent is equal; one-absent
/// versus present is not.
pub fn file_sets_equal(a: &Option<Vec<PathBuf>>, b: &Option<Vec<PathBuf>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            let a: BTreeSet<&PathBuf> = a.iter().collect();
            let b: BTreeSet<&PathBuf> = b.iter().collect();
            a == b
        }
        _ => false,
    }
}

// ===================================================
// SCHEDULES
// ===================================================

/// One periodic scanner trigger, merged from built-in defaults and the
/// persisted `schedules.json` overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub name: String,
    pub scanner: ScannerId,
    pub interval_ms: u64,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

// ===================================================
// HEALTH
// ===================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Per-scanner slice of a health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerHealth {
    pub score: f64,
    pub status: ScanStatus,
    pub last_run: DateTime<Utc>,
    pub violations_count: usize,
    pub warnings_count: usize,
    pub metrics: BTreeMap<String, f64>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallHealth {
    pub score: f64,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceHealth {
    pub packages: usize,
    pub last_scan_duration_ms: u64,
}

/// Weighted aggregation of scanner results at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub overall: OverallHealth,
    pub scanners: BTreeMap<ScannerId, ScannerHealth>,
    pub workspace: WorkspaceHealth,
}
