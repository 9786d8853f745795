// crates/dcyfr-daemon/src/queue.rs
// Priority task queue: deduplication, TTL expiry, persistence, executor loop
//
// The queue exclusively owns every task from enqueue to archive. All state
// lives behind one mutex; emits and scanner execution happen outside it, so
// event listeners may re-enqueue without deadlocking.

use crate::events::{EventBus, EventType};
use crate::registry::ScannerRegistry;
use crate::state;
use chrono::{DateTime, Utc};
use dcyfr_types::{ScanContext, Task, TaskPriority, TaskSource, TaskStatus};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Completed/failed tasks retained for inspection.
const HISTORY_MAX: usize = 100;
/// When the history exceeds the max it is trimmed down to this many.
const HISTORY_TRIM_TO: usize = 50;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Tasks executing at once. Regardless of this value, at most one task
    /// per scanner id runs at any time.
    pub max_concurrent: usize,
    /// Queued tasks older than this expire without running.
    pub ttl: Duration,
    pub persist_path: PathBuf,
}

/// On-disk shape of `queue.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQueue {
    queue: Vec<Task>,
    last_updated: DateTime<Utc>,
}

/// Counters exposed through `stats()` and the heartbeat.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Sorted stable by priority; FIFO within a priority.
    queued: Vec<Task>,
    /// scanner id -> the single task running for it
    running: HashMap<String, Task>,
    history: VecDeque<Task>,
    completed: u64,
    failed: u64,
    expired: u64,
    coalesced: u64,
}

#[derive(Debug)]
pub struct TaskQueue {
    registry: Arc<ScannerRegistry>,
    bus: EventBus,
    config: QueueConfig,
    workspace_root: PathBuf,
    state: Mutex<QueueState>,
    /// Wakes the executor loop after enqueue/restore/completion.
    wake: Notify,
    /// Wakes `drain()` waiters whenever the queue may have gone idle.
    idle: Notify,
}

impl TaskQueue {
    pub fn new(
        registry: Arc<ScannerRegistry>,
        bus: EventBus,
        config: QueueConfig,
        workspace_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bus,
            config,
            workspace_root,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            idle: Notify::new(),
        })
    }

    /// Request one scanner run. Returns `None` when coalesced into an
    /// existing queued or running task with the same scanner and file scope.
    pub fn enqueue(
        &self,
        scanner: &str,
        source: TaskSource,
        priority: TaskPriority,
        files: Option<Vec<PathBuf>>,
        options: Option<serde_json::Value>,
    ) -> Option<Uuid> {
        let task = {
            let mut state = self.lock_state();
            let duplicate = state
                .queued
                .iter()
                .chain(state.running.values())
                .any(|t| t.same_request(scanner, &files));
            if duplicate {
                state.coalesced += 1;
                tracing::debug!("Coalesced duplicate request for {}", scanner);
                return None;
            }

            let task = Task::new(scanner, source, priority, files, options);
            state.queued.push(task.clone());
            state.queued.sort_by_key(|t| t.priority);
            task
        };

        self.bus.emit(
            EventType::TaskQueued,
            json!({
                "taskId": task.id,
                "scanner": task.scanner,
                "priority": task.priority,
                "source": task.source,
            }),
        );
        self.persist();
        self.wake.notify_one();
        Some(task.id)
    }

    pub fn size(&self) -> usize {
        self.lock_state().queued.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock_state();
        QueueStats {
            queued: state.queued.len(),
            running: state.running.len(),
            completed: state.completed,
            failed: state.failed,
            expired: state.expired,
            coalesced: state.coalesced,
        }
    }

    /// Recently archived tasks, newest last.
    pub fn history(&self) -> Vec<Task> {
        self.lock_state().history.iter().cloned().collect()
    }

    /// Drop every queued task. Running tasks are unaffected.
    pub fn clear(&self) {
        self.lock_state().queued.clear();
        self.persist();
        self.idle.notify_waiters();
    }

    /// Resolves once nothing is queued and nothing is running.
    pub async fn drain(&self) {
        loop {
            {
                let state = self.lock_state();
                if state.queued.is_empty() && state.running.is_empty() {
                    return;
                }
            }
            // The idle notify is an optimization; the timeout re-check keeps
            // drain correct even if a completion slips between check and await.
            let _ = tokio::time::timeout(Duration::from_millis(100), self.idle.notified()).await;
        }
    }

    /// Reload persisted queued tasks. Entries still within TTL re-enter the
    /// queue with their original `createdAt` so expiration stays monotonic
    /// across restarts; stale entries expire immediately without running.
    pub fn restore(&self) -> usize {
        let persisted: Option<PersistedQueue> = state::read_json(&self.config.persist_path);
        let Some(persisted) = persisted else {
            return 0;
        };

        let ttl = self.ttl_chrono();
        let now = Utc::now();
        let mut stale = Vec::new();
        let restored = {
            let mut state = self.lock_state();
            let mut restored = 0;
            for mut task in persisted.queue {
                if task.status != TaskStatus::Queued {
                    continue;
                }
                if task.age(now) > ttl {
                    task.status = TaskStatus::Expired;
                    state.expired += 1;
                    stale.push(task);
                    continue;
                }
                state.queued.push(task);
                restored += 1;
            }
            state.queued.sort_by_key(|t| t.priority);
            restored
        };

        let had_stale = !stale.is_empty();
        for task in stale {
            self.emit_expired(&task);
        }
        if restored > 0 || had_stale {
            self.persist();
        }
        if restored > 0 {
            self.wake.notify_one();
        }
        restored
    }

    /// Spawn the executor loop. It runs until `shutdown` turns true; the
    /// supervisor flips it only after the drain completes so queued work
    /// keeps executing during a graceful stop.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Task executor started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.expire_overdue();

            while let Some(task) = self.pick_next() {
                self.bus.emit(
                    EventType::TaskStarted,
                    json!({ "taskId": task.id, "scanner": task.scanner }),
                );
                self.bus
                    .emit(EventType::ScanStarted, json!({ "scanner": task.scanner }));

                let queue = self.clone();
                tokio::spawn(async move { queue.execute(task).await });
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
        tracing::debug!("Task executor stopped");
    }

    /// Highest-priority queued task whose scanner is idle, or `None` when
    /// the concurrency limit is reached.
    fn pick_next(&self) -> Option<Task> {
        let mut state = self.lock_state();
        if state.running.len() >= self.config.max_concurrent {
            return None;
        }
        let idx = state
            .queued
            .iter()
            .position(|t| !state.running.contains_key(&t.scanner))?;
        let mut task = state.queued.remove(idx);
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        state.running.insert(task.scanner.clone(), task.clone());
        Some(task)
    }

    async fn execute(self: Arc<Self>, task: Task) {
        let mut ctx = ScanContext::full(&self.workspace_root);
        ctx.files = task.files.clone();
        ctx.options = task.options.clone();

        let outcome = AssertUnwindSafe(self.registry.run(&task.scanner, &ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => self.complete(task, result),
            Ok(Err(e)) => self.fail(task, e.to_string()),
            Err(_) => self.fail(task, "scanner panicked".to_string()),
        }
    }

    fn complete(&self, mut task: Task, result: dcyfr_types::ScanResult) {
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        let duration_ms = duration_ms(&task);
        self.archive(&task, true);

        self.bus.emit(
            EventType::TaskCompleted,
            json!({
                "taskId": task.id,
                "scanner": task.scanner,
                "status": result.status,
                "duration": duration_ms,
            }),
        );
        let result_json = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        self.bus.emit(EventType::ScanCompleted, result_json);

        self.finish_cycle();
    }

    fn fail(&self, mut task: Task, error: String) {
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.error = Some(error.clone());
        self.archive(&task, false);

        tracing::warn!("Task {} ({}) failed: {}", task.id, task.scanner, error);
        self.bus.emit(
            EventType::TaskFailed,
            json!({ "taskId": task.id, "scanner": task.scanner, "error": error }),
        );

        self.finish_cycle();
    }

    /// Remove from the running set and append to the bounded history.
    fn archive(&self, task: &Task, completed: bool) {
        let mut state = self.lock_state();
        state.running.remove(&task.scanner);
        if completed {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        state.history.push_back(task.clone());
        if state.history.len() > HISTORY_MAX {
            while state.history.len() > HISTORY_TRIM_TO {
                state.history.pop_front();
            }
        }
    }

    fn finish_cycle(&self) {
        self.persist();
        self.wake.notify_one();
        self.idle.notify_waiters();
    }

    /// Age out queued tasks past TTL; each emits `task:expired`.
    fn expire_overdue(&self) {
        let ttl = self.ttl_chrono();
        let now = Utc::now();
        let expired: Vec<Task> = {
            let mut state = self.lock_state();
            let mut kept = Vec::with_capacity(state.queued.len());
            let mut expired = Vec::new();
            for mut task in state.queued.drain(..) {
                if task.age(now) > ttl {
                    task.status = TaskStatus::Expired;
                    expired.push(task);
                } else {
                    kept.push(task);
                }
            }
            state.queued = kept;
            state.expired += expired.len() as u64;
            expired
        };

        if expired.is_empty() {
            return;
        }
        for task in &expired {
            self.emit_expired(task);
        }
        self.persist();
        self.idle.notify_waiters();
    }

    fn emit_expired(&self, task: &Task) {
        tracing::debug!("Task {} ({}) expired without running", task.id, task.scanner);
        self.bus.emit(
            EventType::TaskExpired,
            json!({ "taskId": task.id, "scanner": task.scanner }),
        );
    }

    /// Serialize the live queued set. Failures are logged and swallowed;
    /// memory stays the source of truth until the next successful write.
    fn persist(&self) {
        let snapshot = PersistedQueue {
            queue: self.lock_state().queued.clone(),
            last_updated: Utc::now(),
        };
        if let Err(e) = state::write_json(&self.config.persist_path, &snapshot) {
            tracing::warn!("Failed to persist queue: {}", e);
        }
    }

    fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.ttl).unwrap_or(chrono::Duration::MAX)
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn duration_ms(task: &Task) -> i64 {
    match (task.started_at, task.completed_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds(),
        _ => 0,
    }
}
