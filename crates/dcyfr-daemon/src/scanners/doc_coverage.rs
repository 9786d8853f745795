// crates/dcyfr-daemon/src/scanners/doc_coverage.rs
// Documentation scanner: doc-comment coverage over public Rust items

use super::{collect_files, relative_display};
use crate::registry::Scanner;
use crate::utils::truncate;
use async_trait::async_trait;
use dcyfr_types::{ScanContext, ScanResult, ScannerCategory, Severity, Violation};
use regex::Regex;
use std::time::Instant;

const MAX_FINDINGS: usize = 20;

pub struct DocCoverageScanner {
    public_item: Regex,
}

impl DocCoverageScanner {
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            public_item: Regex::new(r"^\s*pub\s+(async\s+)?(fn|struct|enum|trait)\s+\w+")
                .expect("valid item regex"),
        }
    }

    /// A line documents the item below it if it is a doc comment or an
    /// attribute sitting between the docs and the item.
    fn continues_doc_block(line: &str) -> bool {
        let trimmed = line.trim_start();
        trimmed.starts_with("///") || trimmed.starts_with("#[") || trimmed.starts_with("#!")
    }
}

impl Default for DocCoverageScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for DocCoverageScanner {
    fn id(&self) -> &str {
        "doc-coverage"
    }

    fn name(&self) -> &str {
        "Doc coverage"
    }

    fn description(&self) -> &str {
        "Measures doc-comment coverage of public functions and types"
    }

    fn category(&self) -> ScannerCategory {
        ScannerCategory::Documentation
    }

    async fn scan(&self, ctx: &ScanContext) -> anyhow::Result<ScanResult> {
        let started = Instant::now();
        let mut result = ScanResult::new(self.id());
        let mut total = 0usize;
        let mut documented = 0usize;

        for file in collect_files(ctx, &["rs"]) {
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(content) => content,
                Err(_) => continue,
            };
            let rel = relative_display(&file, &ctx.workspace_root);
            let lines: Vec<&str> = content.lines().collect();

            for (idx, line) in lines.iter().enumerate() {
                if !self.public_item.is_match(line) {
                    continue;
                }
                total += 1;

                // Walk upward through attributes looking for a doc comment
                let mut has_doc = false;
                for previous in lines[..idx].iter().rev() {
                    if previous.trim_start().starts_with("///") {
                        has_doc = true;
                        break;
                    }
                    if !Self::continues_doc_block(previous) {
                        break;
                    }
                }

                if has_doc {
                    documented += 1;
                } else if result.warnings.len() < MAX_FINDINGS {
                    let line_no = (idx + 1) as u32;
                    result.warnings.push(
                        Violation::new(
                            format!("doc-gap:{}:{}", rel, line_no),
                            Severity::Info,
                            format!("Undocumented public item: {}", truncate(line.trim(), 100)),
                        )
                        .at(rel.clone(), line_no),
                    );
                }
            }
        }

        let usage = if total == 0 {
            100.0
        } else {
            (documented as f64 / total as f64) * 100.0
        };
        result.metrics.insert("usage".into(), usage);
        result.summary = format!("{}/{} public items documented", documented, total);
        result.finalize_status();
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcyfr_types::ScanStatus;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fully_documented_passes() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("lib.rs"),
            "/// Does the thing.\npub fn thing() {}\n\n/// Holds state.\n#[derive(Debug)]\npub struct State;\n",
        )
        .unwrap();

        let result = DocCoverageScanner::new()
            .scan(&ScanContext::full(temp.path()))
            .await
            .unwrap();
        assert_eq!(result.status, ScanStatus::Pass);
        assert_eq!(result.metrics["usage"], 100.0);
    }

    #[tokio::test]
    async fn test_undocumented_items_warn() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("lib.rs"),
            "/// Documented.\npub fn ok() {}\npub fn bare() {}\n",
        )
        .unwrap();

        let result = DocCoverageScanner::new()
            .scan(&ScanContext::full(temp.path()))
            .await
            .unwrap();
        assert_eq!(result.status, ScanStatus::Warn);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.metrics["usage"], 50.0);
        assert_eq!(result.warnings[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_doc_found_through_attributes() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("lib.rs"),
            "/// Documented despite the derive between.\n#[derive(Debug, Clone)]\npub struct Wrapped;\n",
        )
        .unwrap();

        let result = DocCoverageScanner::new()
            .scan(&ScanContext::full(temp.path()))
            .await
            .unwrap();
        assert_eq!(result.metrics["usage"], 100.0);
    }

    #[tokio::test]
    async fn test_private_items_not_counted() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("lib.rs"), "fn private() {}\n").unwrap();

        let result = DocCoverageScanner::new()
            .scan(&ScanContext::full(temp.path()))
            .await
            .unwrap();
        assert_eq!(result.metrics["usage"], 100.0);
        assert_eq!(result.status, ScanStatus::Pass);
    }
}
