// crates/dcyfr-daemon/src/scanners/dependency_audit.rs
// Security scanner: cargo-audit advisories for the workspace lockfile

use crate::registry::Scanner;
use async_trait::async_trait;
use dcyfr_types::{ScanContext, ScanResult, ScanStatus, ScannerCategory, Severity, Violation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// The subprocess gets its own deadline; a hung audit must not wedge a
/// queue slot for longer than this.
const AUDIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal slice of `cargo audit --json` output.
#[derive(Debug, Deserialize)]
struct AuditReport {
    vulnerabilities: AuditVulnerabilities,
}

#[derive(Debug, Deserialize)]
struct AuditVulnerabilities {
    count: usize,
    #[serde(default)]
    list: Vec<AuditFinding>,
}

#[derive(Debug, Deserialize)]
struct AuditFinding {
    advisory: Advisory,
    package: AuditPackage,
}

#[derive(Debug, Deserialize)]
struct Advisory {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct AuditPackage {
    name: String,
    version: String,
}

#[derive(Default)]
pub struct DependencyAuditScanner;

impl DependencyAuditScanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Scanner for DependencyAuditScanner {
    fn id(&self) -> &str {
        "dependency-audit"
    }

    fn name(&self) -> &str {
        "Dependency audit"
    }

    fn description(&self) -> &str {
        "Runs cargo-audit against the workspace and reports known advisories"
    }

    fn category(&self) -> ScannerCategory {
        ScannerCategory::Security
    }

    async fn scan(&self, ctx: &ScanContext) -> anyhow::Result<ScanResult> {
        let started = Instant::now();
        let mut result = ScanResult::new(self.id());

        if !ctx.workspace_root.join("Cargo.toml").exists() {
            result.status = ScanStatus::Skipped;
            result.summary = "No Cargo.toml at the workspace root".to_string();
            result.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let child = Command::new("cargo")
            .args(["audit", "--json"])
            .current_dir(&ctx.workspace_root)
            .output();

        let output = match tokio::time::timeout(AUDIT_TIMEOUT, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                // Tool missing or not runnable; the scanner is inapplicable
                tracing::debug!("cargo audit unavailable: {}", e);
                result.status = ScanStatus::Skipped;
                result.summary = format!("cargo-audit not available: {}", e);
                result.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(result);
            }
            Err(_) => {
                result.status = ScanStatus::Skipped;
                result.summary = format!("cargo audit timed out after {:?}", AUDIT_TIMEOUT);
                result.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(result);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report: AuditReport = match serde_json::from_str(&stdout) {
            Ok(report) => report,
            Err(e) => {
                result.status = ScanStatus::Error;
                result.summary = format!("Unparsable cargo audit output: {}", e);
                result.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(result);
            }
        };

        for finding in &report.vulnerabilities.list {
            result.violations.push(
                Violation::new(
                    finding.advisory.id.clone(),
                    Severity::Error,
                    format!(
                        "{} in {} {}: {}",
                        finding.advisory.id,
                        finding.package.name,
                        finding.package.version,
                        finding.advisory.title
                    ),
                ),
            );
        }

        result
            .metrics
            .insert("count".into(), report.vulnerabilities.count as f64);
        result.summary = if report.vulnerabilities.count == 0 {
            "No known advisories".to_string()
        } else {
            format!("{} known advisories", report.vulnerabilities.count)
        };
        result.finalize_status();
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}
