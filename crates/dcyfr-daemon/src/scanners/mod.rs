// crates/dcyfr-daemon/src/scanners/mod.rs
// Builtin scanner set registered at supervisor startup

mod dependency_audit;
mod doc_coverage;
mod license_headers;
mod todo_comments;
mod unimplemented_blocks;

pub use dependency_audit::DependencyAuditScanner;
pub use doc_coverage::DocCoverageScanner;
pub use license_headers::LicenseHeaderScanner;
pub use todo_comments::TodoCommentScanner;
pub use unimplemented_blocks::UnimplementedScanner;

use crate::config::{ignore, GuardianConfig};
use crate::registry::Scanner;
use dcyfr_types::ScanContext;
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

/// Source extensions the content scanners look at.
pub const SOURCE_EXTENSIONS: &[&str] = &["rs", "ts", "tsx", "js", "jsx", "py", "go"];

/// All builtin scanners, in registration order.
pub fn builtin(config: &GuardianConfig) -> Vec<Arc<dyn Scanner>> {
    vec![
        Arc::new(LicenseHeaderScanner::new(config.license_header.clone())),
        Arc::new(TodoCommentScanner::new()),
        Arc::new(UnimplementedScanner::new()),
        Arc::new(DependencyAuditScanner::new()),
        Arc::new(DocCoverageScanner::new()),
    ]
}

/// Files this invocation should look at, honoring the context's file scope
/// and the shared ignore list.
pub(crate) fn collect_files(ctx: &ScanContext, extensions: &[&str]) -> Vec<PathBuf> {
    match &ctx.files {
        Some(scoped) => scoped
            .iter()
            .map(|f| {
                if f.is_absolute() {
                    f.clone()
                } else {
                    ctx.workspace_root.join(f)
                }
            })
            .filter(|p| has_extension(p, extensions))
            .filter(|p| p.is_file())
            .collect(),
        None => WalkDir::new(&ctx.workspace_root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !ignore::should_skip(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| has_extension(p, extensions))
            .collect(),
    }
}

fn has_extension(path: &std::path::Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

/// Workspace-relative form of a scanned path, as findings report it.
/// Paths outside the workspace are shown as-is.
pub(crate) fn relative_display(path: &std::path::Path, workspace_root: &std::path::Path) -> String {
    path.strip_prefix(workspace_root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
