// crates/dcyfr-daemon/src/registry.rs
// Scanner contract and registry: registration, lookup, dispatch

use crate::error::{GuardianError, Result};
use async_trait::async_trait;
use dcyfr_types::{FixResult, ScanContext, ScanResult, ScannerCategory, Violation};
use std::collections::HashMap;
use std::sync::Arc;

/// The uniform capability set every analyzer implements.
///
/// `scan` must be reentrant and must not fail on business-level findings;
/// those are reported inside the returned result. An `Err` return is an
/// execution failure and is caught by whoever dispatched the scanner.
#[async_trait]
pub trait Scanner: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> ScannerCategory;

    /// Project names this scanner applies to; `None` means all projects.
    fn projects(&self) -> Option<Vec<String>> {
        None
    }

    fn can_fix(&self) -> bool {
        false
    }

    async fn scan(&self, ctx: &ScanContext) -> anyhow::Result<ScanResult>;

    /// Repair violations this scanner previously reported. Only invoked on
    /// violations the scanner itself marked `autoFixable`.
    async fn fix(&self, _ctx: &ScanContext, _violations: &[Violation]) -> anyhow::Result<FixResult> {
        anyhow::bail!("scanner does not implement fix")
    }
}

/// Holds scanner definitions; dispatches by id; enumerates by category and
/// project. Built once at startup, then shared read-only.
#[derive(Default)]
pub struct ScannerRegistry {
    order: Vec<Arc<dyn Scanner>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerRegistry")
            .field("scanners", &self.order.len())
            .finish()
    }
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scanner: Arc<dyn Scanner>) -> Result<()> {
        let id = scanner.id().to_string();
        if self.index.contains_key(&id) {
            return Err(GuardianError::DuplicateScanner(id));
        }
        self.index.insert(id, self.order.len());
        self.order.push(scanner);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Scanner>> {
        self.index.get(id).map(|&i| self.order[i].clone())
    }

    /// All scanners in registration order.
    pub fn list(&self) -> Vec<Arc<dyn Scanner>> {
        self.order.clone()
    }

    pub fn list_by_category(&self, category: ScannerCategory) -> Vec<Arc<dyn Scanner>> {
        self.order
            .iter()
            .filter(|s| s.category() == category)
            .cloned()
            .collect()
    }

    /// Scanners whose project set is absent or contains `project`.
    pub fn list_for_project(&self, project: &str) -> Vec<Arc<dyn Scanner>> {
        self.order
            .iter()
            .filter(|s| match s.projects() {
                None => true,
                Some(projects) => projects.iter().any(|p| p == project),
            })
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Dispatch one scanner by id. Scan failures propagate to the caller;
    /// the task queue converts them to failed tasks.
    pub async fn run(&self, id: &str, ctx: &ScanContext) -> Result<ScanResult> {
        let scanner = self.get(id).ok_or_else(|| self.unknown(id))?;
        let result = scanner.scan(ctx).await?;
        Ok(result)
    }

    /// Run every applicable scanner in registration order, converting each
    /// failure into an `error`-status result instead of propagating.
    pub async fn run_all(&self, ctx: &ScanContext) -> Vec<ScanResult> {
        let scanners = match &ctx.project {
            Some(project) => self.list_for_project(project),
            None => self.list(),
        };

        let mut results = Vec::with_capacity(scanners.len());
        for scanner in scanners {
            match scanner.scan(ctx).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!("Scanner {} failed: {:#}", scanner.id(), e);
                    results.push(ScanResult::execution_error(scanner.id(), e.to_string()));
                }
            }
        }
        results
    }

    /// Dispatch a fix over the auto-fixable subset of `violations`.
    pub async fn run_fix(
        &self,
        id: &str,
        ctx: &ScanContext,
        violations: &[Violation],
    ) -> Result<FixResult> {
        let scanner = self.get(id).ok_or_else(|| self.unknown(id))?;
        if !scanner.can_fix() {
            return Err(GuardianError::FixUnsupported(id.to_string()));
        }
        let fixable: Vec<Violation> = violations
            .iter()
            .filter(|v| v.auto_fixable)
            .cloned()
            .collect();
        let result = scanner.fix(ctx, &fixable).await?;
        Ok(result)
    }

    fn unknown(&self, id: &str) -> GuardianError {
        GuardianError::UnknownScanner {
            id: id.to_string(),
            known: self.ids().join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcyfr_types::{ScanStatus, Severity};

    struct StubScanner {
        id: &'static str,
        category: ScannerCategory,
        projects: Option<Vec<String>>,
        fail: bool,
    }

    impl StubScanner {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                category: ScannerCategory::Cleanup,
                projects: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Scanner for StubScanner {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn category(&self) -> ScannerCategory {
            self.category
        }
        fn projects(&self) -> Option<Vec<String>> {
            self.projects.clone()
        }
        async fn scan(&self, _ctx: &ScanContext) -> anyhow::Result<ScanResult> {
            if self.fail {
                anyhow::bail!("tool invocation failed");
            }
            let mut result = ScanResult::new(self.id);
            result.summary = "ok".into();
            Ok(result)
        }
    }

    fn ctx() -> ScanContext {
        ScanContext::full("/tmp/workspace")
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(StubScanner::new("a"))).unwrap();
        let err = registry
            .register(Arc::new(StubScanner::new("a")))
            .unwrap_err();
        assert!(matches!(err, GuardianError::DuplicateScanner(_)));
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let mut registry = ScannerRegistry::new();
        for id in ["c", "a", "b"] {
            registry.register(Arc::new(StubScanner::new(id))).unwrap();
        }
        assert_eq!(registry.ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_list_by_category() {
        let mut registry = ScannerRegistry::new();
        let mut sec = StubScanner::new("sec");
        sec.category = ScannerCategory::Security;
        registry.register(Arc::new(sec)).unwrap();
        registry
            .register(Arc::new(StubScanner::new("clean")))
            .unwrap();

        let security = registry.list_by_category(ScannerCategory::Security);
        assert_eq!(security.len(), 1);
        assert_eq!(security[0].id(), "sec");
    }

    #[test]
    fn test_list_for_project_filtering() {
        let mut registry = ScannerRegistry::new();
        let mut scoped = StubScanner::new("scoped");
        scoped.projects = Some(vec!["web".to_string()]);
        registry.register(Arc::new(scoped)).unwrap();
        registry
            .register(Arc::new(StubScanner::new("global")))
            .unwrap();

        let for_web = registry.list_for_project("web");
        assert_eq!(for_web.len(), 2);
        let for_api = registry.list_for_project("api");
        assert_eq!(for_api.len(), 1);
        assert_eq!(for_api[0].id(), "global");
    }

    #[tokio::test]
    async fn test_run_unknown_scanner_lists_known_ids() {
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(StubScanner::new("a"))).unwrap();
        registry.register(Arc::new(StubScanner::new("b"))).unwrap();

        let err = registry.run("missing", &ctx()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown-scanner"));
        assert!(msg.contains("a, b"));
    }

    #[tokio::test]
    async fn test_run_all_converts_failures() {
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(StubScanner::new("good"))).unwrap();
        let mut bad = StubScanner::new("bad");
        bad.fail = true;
        registry.register(Arc::new(bad)).unwrap();

        let results = registry.run_all(&ctx()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ScanStatus::Pass);
        assert_eq!(results[1].status, ScanStatus::Error);
        assert!(results[1].summary.contains("tool invocation failed"));
    }

    #[tokio::test]
    async fn test_run_fix_unsupported() {
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(StubScanner::new("a"))).unwrap();
        let violations = vec![Violation::new("v", Severity::Error, "x")];
        let err = registry.run_fix("a", &ctx(), &violations).await.unwrap_err();
        assert!(matches!(err, GuardianError::FixUnsupported(_)));
    }
}
