// crates/dcyfr-daemon/src/watcher.rs
// Reactive file watcher: pattern rules, per-rule debouncing, batch flushes
//
// Filesystem events arrive on notify's own thread and are bridged into the
// tokio loop over an mpsc channel; the loop body matches rules, accumulates
// debounce batches, and flushes them as HIGH-priority tasks.

use crate::config::ignore;
use crate::events::{EventBus, EventType};
use crate::queue::TaskQueue;
use dcyfr_types::{TaskPriority, TaskSource};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// How often pending batches are checked for elapsed debounce windows.
const FLUSH_TICK_MS: u64 = 100;

/// Kind of change observed on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

impl ChangeKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }
}

/// Maps changed paths to the scanners that should re-run.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub pattern: Regex,
    pub scanners: Vec<String>,
    pub debounce: Option<Duration>,
}

impl WatchRule {
    /// Panics only on an invalid hard-coded pattern, which is a programming
    /// error caught by the defaults tests.
    #[allow(clippy::expect_used)]
    pub fn new(pattern: &str, scanners: &[&str], debounce: Option<Duration>) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("invalid watch rule pattern"),
            scanners: scanners.iter().map(|s| s.to_string()).collect(),
            debounce,
        }
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        self.pattern.is_match(relative_path)
    }

    /// Batch key: the sorted concatenation of target scanners. Rules with
    /// different scanner sets never share a batch, even for the same path.
    fn batch_key(&self) -> String {
        let mut ids = self.scanners.clone();
        ids.sort();
        ids.join("+")
    }
}

struct Batch {
    scanners: Vec<String>,
    files: BTreeSet<PathBuf>,
    deadline: Instant,
    debounce: Duration,
}

enum WatchMessage {
    Change(PathBuf, ChangeKind),
    HostError(String),
}

/// Watches the workspace root and converts matching change events into
/// debounced scanner tasks.
#[derive(Debug)]
pub struct FileWatcher {
    queue: Arc<TaskQueue>,
    bus: EventBus,
    workspace_root: PathBuf,
    rules: Vec<WatchRule>,
    debounce_default: Duration,
    active: Arc<AtomicBool>,
}

impl FileWatcher {
    pub fn new(
        queue: Arc<TaskQueue>,
        bus: EventBus,
        workspace_root: PathBuf,
        rules: Vec<WatchRule>,
        debounce_default: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            bus,
            workspace_root,
            rules,
            debounce_default,
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn the watch loop. Resolves when `shutdown` flips; all open
    /// debounce timers are cancelled and the OS watcher is closed.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let watcher = self.clone();
        tokio::spawn(async move { watcher.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel::<WatchMessage>(1024);

        let tx_events = tx.clone();
        let mut os_watcher: RecommendedWatcher = match Watcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let kind = match event.kind {
                        EventKind::Create(_) => Some(ChangeKind::Add),
                        EventKind::Modify(_) => Some(ChangeKind::Change),
                        EventKind::Remove(_) => Some(ChangeKind::Unlink),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        for path in event.paths {
                            let _ = tx_events.blocking_send(WatchMessage::Change(path, kind));
                        }
                    }
                }
                Err(e) => {
                    let _ = tx_events.blocking_send(WatchMessage::HostError(e.to_string()));
                }
            },
            Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("Failed to create file watcher: {}", e);
                return;
            }
        };

        if let Err(e) = os_watcher.watch(&self.workspace_root, RecursiveMode::Recursive) {
            tracing::error!("Failed to watch {}: {}", self.workspace_root.display(), e);
            return;
        }
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("File watcher started on {}", self.workspace_root.display());

        let mut batches: HashMap<String, Batch> = HashMap::new();

        loop {
            tokio::select! {
                Some(message) = rx.recv() => match message {
                    WatchMessage::Change(path, kind) => {
                        self.handle_change(&mut batches, &path, kind);
                    }
                    WatchMessage::HostError(error) => {
                        tracing::warn!("Watcher host error: {}", error);
                        self.bus.emit(EventType::WatcherError, json!({ "error": error }));
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(FLUSH_TICK_MS)) => {
                    self.flush_due(&mut batches);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Open debounce batches are cancelled, not flushed
        batches.clear();
        drop(os_watcher);
        self.active.store(false, Ordering::SeqCst);
        tracing::info!("File watcher stopped");
    }

    /// Normalize, publish, rule-match, and fold the path into batches.
    fn handle_change(&self, batches: &mut HashMap<String, Batch>, path: &Path, kind: ChangeKind) {
        let relative = match path.strip_prefix(&self.workspace_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        };
        if ignore::is_ignored_path(&relative) {
            return;
        }
        let relative_str = relative.to_string_lossy().to_string();

        self.bus.emit(
            EventType::WatcherChange,
            json!({ "path": relative_str, "kind": kind.as_str() }),
        );

        let now = Instant::now();
        for rule in self.rules.iter().filter(|r| r.matches(&relative_str)) {
            let debounce = rule.debounce.unwrap_or(self.debounce_default);
            let batch = batches.entry(rule.batch_key()).or_insert_with(|| Batch {
                scanners: rule.scanners.clone(),
                files: BTreeSet::new(),
                deadline: now + debounce,
                debounce,
            });
            batch.files.insert(relative.clone());
            // The window restarts from the latest matching event
            batch.deadline = now + batch.debounce;
        }
    }

    /// Flush batches whose debounce window has elapsed: one HIGH-priority
    /// task per target scanner, carrying the accumulated file list.
    fn flush_due(&self, batches: &mut HashMap<String, Batch>) {
        let now = Instant::now();
        let due: Vec<String> = batches
            .iter()
            .filter(|(_, batch)| now >= batch.deadline)
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            let Some(batch) = batches.remove(&key) else { continue };
            let files: Vec<PathBuf> = batch.files.into_iter().collect();
            tracing::debug!(
                "Flushing watch batch {} ({} files)",
                key,
                files.len()
            );
            for scanner in &batch.scanners {
                self.queue.enqueue(
                    scanner,
                    TaskSource::Watcher,
                    TaskPriority::High,
                    Some(files.clone()),
                    None,
                );
            }
        }
    }
}
