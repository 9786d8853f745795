// crates/dcyfr-daemon/src/scanners/todo_comments.rs
// Cleanup scanner: TODO/FIXME/HACK/XXX markers left in source

use super::{collect_files, relative_display, SOURCE_EXTENSIONS};
use crate::registry::Scanner;
use crate::utils::truncate;
use async_trait::async_trait;
use dcyfr_types::{ScanContext, ScanResult, ScannerCategory, Severity, Violation};
use regex::Regex;
use std::time::Instant;

/// Limit to prevent flooding a single result
const MAX_FINDINGS: usize = 50;

pub struct TodoCommentScanner {
    marker: Regex,
}

impl TodoCommentScanner {
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            marker: Regex::new(r"(TODO|FIXME|HACK|XXX)(\([^)]+\))?:").expect("valid marker regex"),
        }
    }
}

impl Default for TodoCommentScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for TodoCommentScanner {
    fn id(&self) -> &str {
        "todo-comments"
    }

    fn name(&self) -> &str {
        "TODO comments"
    }

    fn description(&self) -> &str {
        "Finds TODO, FIXME, HACK and XXX markers in source files"
    }

    fn category(&self) -> ScannerCategory {
        ScannerCategory::Cleanup
    }

    async fn scan(&self, ctx: &ScanContext) -> anyhow::Result<ScanResult> {
        let started = Instant::now();
        let mut result = ScanResult::new(self.id());
        let mut total = 0usize;

        for file in collect_files(ctx, SOURCE_EXTENSIONS) {
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(content) => content,
                Err(_) => continue,
            };
            let rel = relative_display(&file, &ctx.workspace_root);

            for (line_no, line) in content.lines().enumerate() {
                let Some(m) = self.marker.find(line) else { continue };
                total += 1;
                // Findings are capped but the count metric stays exact
                if result.warnings.len() >= MAX_FINDINGS {
                    continue;
                }
                let line_no = (line_no + 1) as u32;
                result.warnings.push(
                    Violation::new(
                        format!("todo:{}:{}", rel, line_no),
                        Severity::Warning,
                        format!("{} - {}", m.as_str(), truncate(line.trim(), 120)),
                    )
                    .at(rel.clone(), line_no),
                );
            }
        }

        result.metrics.insert("count".into(), total as f64);
        result.summary = if total == 0 {
            "No TODO markers found".to_string()
        } else {
            format!("{} TODO markers in the workspace", total)
        };
        result.finalize_status();
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}
