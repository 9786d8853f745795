// crates/dcyfr-daemon/src/scanners/license_headers.rs
// Compliance scanner: every source file must open with the license header

use super::{collect_files, relative_display, SOURCE_EXTENSIONS};
use crate::registry::Scanner;
use async_trait::async_trait;
use dcyfr_types::{
    FixResult, ScanContext, ScanResult, ScannerCategory, Severity, Violation,
};
use std::path::Path;
use std::time::Instant;

/// How many leading lines may precede the header (shebangs, encoding marks).
const HEADER_WINDOW_LINES: usize = 5;

pub struct LicenseHeaderScanner {
    header: String,
}

impl LicenseHeaderScanner {
    pub fn new(header: String) -> Self {
        Self { header }
    }

    fn has_header(&self, content: &str) -> bool {
        content
            .lines()
            .take(HEADER_WINDOW_LINES)
            .any(|line| line.contains(&self.header))
    }

    /// Comment prefix for the file's language.
    fn comment_prefix(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => "#",
            _ => "//",
        }
    }
}

#[async_trait]
impl Scanner for LicenseHeaderScanner {
    fn id(&self) -> &str {
        "license-headers"
    }

    fn name(&self) -> &str {
        "License headers"
    }

    fn description(&self) -> &str {
        "Checks that source files carry the workspace license header"
    }

    fn category(&self) -> ScannerCategory {
        ScannerCategory::Compliance
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn scan(&self, ctx: &ScanContext) -> anyhow::Result<ScanResult> {
        let started = Instant::now();
        let mut result = ScanResult::new(self.id());

        let files = collect_files(ctx, SOURCE_EXTENSIONS);
        let total = files.len();
        let mut compliant = 0usize;

        for file in &files {
            let content = match tokio::fs::read_to_string(file).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!("Skipping unreadable file {}: {}", file.display(), e);
                    continue;
                }
            };
            if self.has_header(&content) {
                compliant += 1;
            } else {
                let rel = relative_display(file, &ctx.workspace_root);
                let mut violation = Violation::new(
                    format!("license-header:{}", rel),
                    Severity::Error,
                    format!("Missing license header in {}", rel),
                )
                .at(rel, 1);
                violation.fix = Some(format!("Prepend '{}'", self.header));
                violation.auto_fixable = true;
                result.violations.push(violation);
            }
        }

        let compliance = if total == 0 {
            100.0
        } else {
            (compliant as f64 / total as f64) * 100.0
        };
        result.metrics.insert("compliance".into(), compliance);
        result.summary = format!(
            "{}/{} files carry the license header",
            compliant, total
        );
        result.finalize_status();
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn fix(&self, ctx: &ScanContext, violations: &[Violation]) -> anyhow::Result<FixResult> {
        let mut result = FixResult {
            scanner: self.id().to_string(),
            fixed: 0,
            failed: 0,
            messages: Vec::new(),
        };

        for violation in violations {
            let Some(file) = &violation.file else {
                result.failed += 1;
                continue;
            };
            let path = ctx.workspace_root.join(file);
            if ctx.dry_run {
                result.messages.push(format!("Would prepend header to {}", file));
                result.fixed += 1;
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let prefix = Self::comment_prefix(&path);
                    let patched = format!("{} {}\n{}", prefix, self.header, content);
                    match tokio::fs::write(&path, patched).await {
                        Ok(()) => {
                            result.fixed += 1;
                            result.messages.push(format!("Prepended header to {}", file));
                        }
                        Err(e) => {
                            result.failed += 1;
                            result.messages.push(format!("{}: {}", file, e));
                        }
                    }
                }
                Err(e) => {
                    result.failed += 1;
                    result.messages.push(format!("{}: {}", file, e));
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcyfr_types::ScanStatus;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "Copyright (c) dcyfr";

    fn scanner() -> LicenseHeaderScanner {
        LicenseHeaderScanner::new(HEADER.to_string())
    }

    fn workspace() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        temp
    }

    #[tokio::test]
    async fn test_all_files_compliant() {
        let temp = workspace();
        fs::write(
            temp.path().join("src/ok.rs"),
            format!("// {}\nfn main() {{}}\n", HEADER),
        )
        .unwrap();

        let result = scanner().scan(&ScanContext::full(temp.path())).await.unwrap();
        assert_eq!(result.status, ScanStatus::Pass);
        assert_eq!(result.metrics["compliance"], 100.0);
        assert!(result.violations.is_empty());
    }

    #[tokio::test]
    async fn test_missing_header_is_fixable_violation() {
        let temp = workspace();
        fs::write(temp.path().join("src/bad.rs"), "fn main() {}\n").unwrap();

        let result = scanner().scan(&ScanContext::full(temp.path())).await.unwrap();
        assert_eq!(result.status, ScanStatus::Fail);
        assert_eq!(result.violations.len(), 1);
        assert!(result.violations[0].auto_fixable);
        assert_eq!(result.violations[0].severity, Severity::Error);
        assert_eq!(result.metrics["compliance"], 0.0);
    }

    #[tokio::test]
    async fn test_compliance_percentage() {
        let temp = workspace();
        fs::write(
            temp.path().join("src/ok.rs"),
            format!("// {}\n", HEADER),
        )
        .unwrap();
        fs::write(temp.path().join("src/bad.rs"), "fn x() {}\n").unwrap();

        let result = scanner().scan(&ScanContext::full(temp.path())).await.unwrap();
        assert_eq!(result.metrics["compliance"], 50.0);
    }

    #[tokio::test]
    async fn test_empty_workspace_passes() {
        let temp = workspace();
        let result = scanner().scan(&ScanContext::full(temp.path())).await.unwrap();
        assert_eq!(result.status, ScanStatus::Pass);
        assert_eq!(result.metrics["compliance"], 100.0);
    }

    #[tokio::test]
    async fn test_fix_prepends_header() {
        let temp = workspace();
        fs::write(temp.path().join("src/bad.rs"), "fn main() {}\n").unwrap();
        let s = scanner();
        let ctx = ScanContext::full(temp.path());

        let scan = s.scan(&ctx).await.unwrap();
        let fix = s.fix(&ctx, &scan.violations).await.unwrap();
        assert_eq!(fix.fixed, 1);
        assert_eq!(fix.failed, 0);

        let content = fs::read_to_string(temp.path().join("src/bad.rs")).unwrap();
        assert!(content.starts_with(&format!("// {}", HEADER)));
        assert!(content.contains("fn main()"));

        // Re-scan is now clean
        let rescan = s.scan(&ctx).await.unwrap();
        assert_eq!(rescan.status, ScanStatus::Pass);
    }

    #[tokio::test]
    async fn test_fix_dry_run_leaves_files_alone() {
        let temp = workspace();
        fs::write(temp.path().join("src/bad.rs"), "fn main() {}\n").unwrap();
        let s = scanner();
        let mut ctx = ScanContext::full(temp.path());

        let scan = s.scan(&ctx).await.unwrap();
        ctx.dry_run = true;
        let fix = s.fix(&ctx, &scan.violations).await.unwrap();
        assert_eq!(fix.fixed, 1);

        let content = fs::read_to_string(temp.path().join("src/bad.rs")).unwrap();
        assert_eq!(content, "fn main() {}\n");
    }

    #[tokio::test]
    async fn test_python_comment_prefix() {
        let temp = workspace();
        fs::write(temp.path().join("src/tool.py"), "print('hi')\n").unwrap();
        let s = scanner();
        let ctx = ScanContext::full(temp.path());

        let scan = s.scan(&ctx).await.unwrap();
        s.fix(&ctx, &scan.violations).await.unwrap();

        let content = fs::read_to_string(temp.path().join("src/tool.py")).unwrap();
        assert!(content.starts_with(&format!("# {}", HEADER)));
    }

    #[tokio::test]
    async fn test_scoped_scan_only_touches_listed_files() {
        let temp = workspace();
        fs::write(temp.path().join("src/a.rs"), "fn a() {}\n").unwrap();
        fs::write(temp.path().join("src/b.rs"), "fn b() {}\n").unwrap();

        let ctx = ScanContext::full(temp.path())
            .with_files(vec![std::path::PathBuf::from("src/a.rs")]);
        let result = scanner().scan(&ctx).await.unwrap();
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].file.as_deref(), Some("src/a.rs"));
    }
}
