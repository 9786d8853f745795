// crates/dcyfr-daemon/tests/test_utils.rs
// Shared fixtures for integration tests

use async_trait::async_trait;
use dcyfr_daemon::events::EventBus;
use dcyfr_daemon::queue::{QueueConfig, TaskQueue};
use dcyfr_daemon::registry::{Scanner, ScannerRegistry};
use dcyfr_types::{ScanContext, ScanResult, ScannerCategory};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Scanner stub with a configurable delay, recording execution order.
pub struct StubScanner {
    pub id: String,
    pub delay: Duration,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl StubScanner {
    pub fn new(id: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: id.to_string(),
            delay: Duration::ZERO,
            log,
        }
    }

    pub fn slow(id: &str, delay: Duration, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: id.to_string(),
            delay,
            log,
        }
    }
}

#[async_trait]
impl Scanner for StubScanner {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn description(&self) -> &str {
        "test stub"
    }
    fn category(&self) -> ScannerCategory {
        ScannerCategory::Testing
    }
    async fn scan(&self, _ctx: &ScanContext) -> anyhow::Result<ScanResult> {
        self.log.lock().unwrap().push(self.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut result = ScanResult::new(&self.id);
        result.summary = "stub run".into();
        Ok(result)
    }
}

/// A workspace directory plus a queue wired to the given stub scanners.
pub struct QueueHarness {
    pub temp: TempDir,
    pub bus: EventBus,
    pub queue: Arc<TaskQueue>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl QueueHarness {
    pub fn new(scanners: Vec<StubScanner>) -> Self {
        Self::with_ttl(scanners, Duration::from_secs(3600))
    }

    pub fn with_ttl(scanners: Vec<StubScanner>, ttl: Duration) -> Self {
        let temp = TempDir::new().unwrap();
        let log = scanners
            .first()
            .map(|s| s.log.clone())
            .unwrap_or_default();
        let mut registry = ScannerRegistry::new();
        for scanner in scanners {
            registry.register(Arc::new(scanner)).unwrap();
        }
        let bus = EventBus::new();
        let queue = TaskQueue::new(
            Arc::new(registry),
            bus.clone(),
            QueueConfig {
                max_concurrent: 1,
                ttl,
                persist_path: temp.path().join("queue.json"),
            },
            temp.path().to_path_buf(),
        );
        Self {
            temp,
            bus,
            queue,
            log,
        }
    }

    pub fn queue_path(&self) -> std::path::PathBuf {
        self.temp.path().join("queue.json")
    }
}
