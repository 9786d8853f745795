// crates/dcyfr-daemon/src/scanners/unimplemented_blocks.rs
// Cleanup scanner: unimplemented!() and todo!() left in Rust sources

use super::{collect_files, relative_display};
use crate::registry::Scanner;
use crate::utils::truncate;
use async_trait::async_trait;
use dcyfr_types::{ScanContext, ScanResult, ScannerCategory, Severity, Violation};
use regex::Regex;
use std::time::Instant;

const MAX_FINDINGS: usize = 20;

pub struct UnimplementedScanner {
    marker: Regex,
}

impl UnimplementedScanner {
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            marker: Regex::new(r"(unimplemented!|todo!)\s*\(").expect("valid macro regex"),
        }
    }
}

impl Default for UnimplementedScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for UnimplementedScanner {
    fn id(&self) -> &str {
        "unimplemented-blocks"
    }

    fn name(&self) -> &str {
        "Unimplemented blocks"
    }

    fn description(&self) -> &str {
        "Finds unimplemented!() and todo!() macros that would panic at runtime"
    }

    fn category(&self) -> ScannerCategory {
        ScannerCategory::Cleanup
    }

    async fn scan(&self, ctx: &ScanContext) -> anyhow::Result<ScanResult> {
        let started = Instant::now();
        let mut result = ScanResult::new(self.id());
        let mut total = 0usize;

        for file in collect_files(ctx, &["rs"]) {
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(content) => content,
                Err(_) => continue,
            };
            let rel = relative_display(&file, &ctx.workspace_root);
            for (line_no, line) in content.lines().enumerate() {
                if !self.marker.is_match(line) {
                    continue;
                }
                total += 1;
                if result.violations.len() >= MAX_FINDINGS {
                    continue;
                }
                let line_no = (line_no + 1) as u32;
                result.violations.push(
                    Violation::new(
                        format!("unimplemented:{}:{}", rel, line_no),
                        Severity::Error,
                        format!("Panicking stub: {}", truncate(line.trim(), 120)),
                    )
                    .at(rel.clone(), line_no),
                );
            }
        }

        result.metrics.insert("count".into(), total as f64);
        result.summary = if total == 0 {
            "No panicking stubs found".to_string()
        } else {
            format!("{} panicking stubs in the workspace", total)
        };
        result.finalize_status();
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}
