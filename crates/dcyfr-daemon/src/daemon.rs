// crates/dcyfr-daemon/src/daemon.rs
// Process supervisor: single-instance lock, wiring, signals, heartbeat,
// graceful drain

use crate::config::defaults::{default_watch_rules, DEFAULT_SCHEDULES};
use crate::config::{ignore, GuardianConfig};
use crate::error::{GuardianError, Result};
use crate::events::{EventBus, EventType};
use crate::health;
use crate::logging::LogFile;
use crate::queue::{QueueConfig, TaskQueue};
use crate::registry::ScannerRegistry;
use crate::scanners;
use crate::scheduler::Scheduler;
use crate::state::StateDir;
use crate::watcher::FileWatcher;
use crate::{state, utils::truncate};
use chrono::{DateTime, Utc};
use dcyfr_types::ScanResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Contents of `daemon-state.json`, refreshed on every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: u64,
    pub tasks_queued: usize,
    #[serde(rename = "memoryUsageMB")]
    pub memory_usage_mb: u64,
    pub scheduler_active: bool,
    pub watcher_active: bool,
}

/// Coordinates the bus, registry, queue, scheduler, and watcher for one
/// workspace. Owns all three trigger components; they hold borrowed handles
/// to the queue and bus received at construction.
#[derive(Debug)]
pub struct Daemon {
    config: GuardianConfig,
    state_dir: StateDir,
    bus: EventBus,
    registry: Arc<ScannerRegistry>,
    queue: Arc<TaskQueue>,
    scheduler: Arc<Scheduler>,
    watcher: Arc<FileWatcher>,
    log: Arc<LogFile>,
    /// Latest result per scanner, captured from scan:completed events.
    results: Arc<Mutex<HashMap<String, ScanResult>>>,
    health_dirty: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
    start_instant: Instant,
    /// Stops the scheduler timers and the watcher loop.
    triggers_shutdown: watch::Sender<bool>,
    /// Stops the queue executor; flipped only after the drain finishes.
    queue_shutdown: watch::Sender<bool>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl Daemon {
    /// Acquire the single-instance lock and wire every component. Fatal
    /// failures here (state dir, pid write) abort startup; everything after
    /// degrades gracefully.
    pub fn start(config: GuardianConfig) -> Result<Arc<Self>> {
        let state_dir = StateDir::new(&config.workspace_root);
        state_dir.ensure()?;

        if let Some(pid) = Self::is_running(&state_dir) {
            return Err(GuardianError::AlreadyRunning { pid });
        }
        // A leftover file at this point names a dead process
        let _ = std::fs::remove_file(state_dir.pid_path());

        let pid = std::process::id();
        std::fs::write(state_dir.pid_path(), pid.to_string())?;

        let log = Arc::new(LogFile::new(
            state_dir.log_path(),
            config.log_max_bytes,
            config.log_max_files,
        ));

        let bus = EventBus::new();
        let mut registry = ScannerRegistry::new();
        for scanner in scanners::builtin(&config) {
            registry.register(scanner)?;
        }
        let registry = Arc::new(registry);

        let queue = TaskQueue::new(
            registry.clone(),
            bus.clone(),
            QueueConfig {
                max_concurrent: config.max_concurrent,
                ttl: config.task_ttl,
                persist_path: state_dir.queue_path(),
            },
            config.workspace_root.clone(),
        );
        let restored = queue.restore();
        if restored > 0 {
            tracing::info!("Restored {} queued tasks", restored);
            log.info(&format!("Restored {} queued tasks", restored));
        }

        let scheduler = Scheduler::new(
            queue.clone(),
            bus.clone(),
            state_dir.schedules_path(),
            DEFAULT_SCHEDULES.to_vec(),
        );
        let watcher = FileWatcher::new(
            queue.clone(),
            bus.clone(),
            config.workspace_root.clone(),
            default_watch_rules(config.debounce_default),
            config.debounce_default,
        );

        let (triggers_shutdown, _) = watch::channel(false);
        let (queue_shutdown, _) = watch::channel(false);

        let daemon = Arc::new(Self {
            config,
            state_dir,
            bus,
            registry,
            queue,
            scheduler,
            watcher,
            log,
            results: Arc::new(Mutex::new(HashMap::new())),
            health_dirty: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
            start_instant: Instant::now(),
            triggers_shutdown,
            queue_shutdown,
            heartbeat_handle: Mutex::new(None),
            stopping: AtomicBool::new(false),
        });

        daemon.subscribe_log_listener();
        daemon.subscribe_result_capture();

        daemon.queue.start(daemon.queue_shutdown.subscribe());
        daemon
            .scheduler
            .start(daemon.triggers_shutdown.subscribe());
        daemon.watcher.start(daemon.triggers_shutdown.subscribe());
        *lock(&daemon.heartbeat_handle) = Some(daemon.spawn_heartbeat());

        daemon.bus.emit(EventType::DaemonStarted, json!({ "pid": pid }));
        daemon.log.info(&format!("Daemon started (pid {})", pid));
        tracing::info!(
            "Daemon started (pid {}) guarding {}",
            pid,
            daemon.config.workspace_root.display()
        );
        Ok(daemon)
    }

    /// Check the pid file for a live daemon.
    pub fn is_running(state_dir: &StateDir) -> Option<u32> {
        let contents = std::fs::read_to_string(state_dir.pid_path()).ok()?;
        let pid = contents.trim().parse::<u32>().ok()?;
        if Path::new(&format!("/proc/{}", pid)).exists() {
            Some(pid)
        } else {
            None
        }
    }

    /// Ask a running daemon to stop by sending SIGTERM to the recorded pid.
    pub fn signal_stop(state_dir: &StateDir) -> bool {
        match Self::is_running(state_dir) {
            Some(pid) => {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                true
            }
            None => false,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<ScannerRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Block until a termination signal arrives, then run the stop sequence.
    /// Failing to bind the handlers is fatal.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sighup.recv() => tracing::info!("Received SIGHUP"),
        }

        self.stop().await;
        Ok(())
    }

    /// Graceful drain. Safe to call more than once; only the first call does
    /// the work.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        self.bus.emit(EventType::DaemonStopping, json!({}));
        self.log.info("Daemon stopping");
        tracing::info!("Daemon stopping");

        // Refuse new work before waiting on in-flight work
        self.scheduler.stop();
        let _ = self.triggers_shutdown.send(true);

        let drained =
            tokio::time::timeout(self.config.drain_timeout, self.queue.drain()).await;
        if drained.is_err() {
            tracing::warn!(
                "Drain deadline ({:?}) elapsed with tasks still in flight",
                self.config.drain_timeout
            );
            self.log.warn("Drain deadline elapsed with tasks still in flight");
        }

        self.write_health_snapshot();

        let _ = self.queue_shutdown.send(true);
        if let Some(handle) = lock(&self.heartbeat_handle).take() {
            handle.abort();
        }
        self.bus.clear();
        let _ = std::fs::remove_file(self.state_dir.pid_path());

        self.bus.emit(EventType::DaemonStopped, json!({}));
        self.log.info("Daemon stopped");
        tracing::info!("Daemon stopped");
    }

    /// Route observable lifecycle events into the rotating log.
    fn subscribe_log_listener(&self) {
        let log = self.log.clone();
        let _ = self.bus.subscribe_all(move |event| {
            let data = &event.data;
            match event.event_type {
                EventType::TaskQueued => log.info(&format!(
                    "Task queued: {} (source={}, priority={})",
                    data["scanner"].as_str().unwrap_or("?"),
                    data["source"].as_str().unwrap_or("?"),
                    data["priority"].as_str().unwrap_or("?"),
                )),
                EventType::TaskStarted => log.info(&format!(
                    "Task started: {}",
                    data["scanner"].as_str().unwrap_or("?")
                )),
                EventType::TaskCompleted => log.info(&format!(
                    "Task completed: {} status={} ({} ms)",
                    data["scanner"].as_str().unwrap_or("?"),
                    data["status"].as_str().unwrap_or("?"),
                    data["duration"].as_i64().unwrap_or(0),
                )),
                EventType::TaskFailed => log.warn(&format!(
                    "Task failed: {}: {}",
                    data["scanner"].as_str().unwrap_or("?"),
                    truncate(data["error"].as_str().unwrap_or("?"), 200),
                )),
                EventType::TaskExpired => log.warn(&format!(
                    "Task expired before running: {}",
                    data["scanner"].as_str().unwrap_or("?")
                )),
                EventType::ScheduleTriggered => log.info(&format!(
                    "Schedule triggered: {}",
                    data["id"].as_str().unwrap_or("?")
                )),
                EventType::WatcherChange => log.info(&format!(
                    "Change detected: {} ({})",
                    data["path"].as_str().unwrap_or("?"),
                    data["kind"].as_str().unwrap_or("?"),
                )),
                EventType::WatcherError => log.warn(&format!(
                    "Watcher error: {}",
                    data["error"].as_str().unwrap_or("?")
                )),
                EventType::HealthUpdated => log.info(&format!(
                    "Health updated: score={} status={}",
                    data["score"],
                    data["status"].as_str().unwrap_or("?"),
                )),
                _ => {}
            }
        });
    }

    /// Keep the latest result per scanner for health snapshots.
    fn subscribe_result_capture(&self) {
        let results = self.results.clone();
        let dirty = self.health_dirty.clone();
        let _ = self.bus.subscribe(EventType::ScanCompleted, move |event| {
            match serde_json::from_value::<ScanResult>(event.data.clone()) {
                Ok(result) => {
                    lock(&results).insert(result.scanner.clone(), result);
                    dirty.store(true, Ordering::SeqCst);
                }
                Err(e) => tracing::debug!("Unreadable scan result payload: {}", e),
            }
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let daemon = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(daemon.config.heartbeat_interval);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                daemon.heartbeat();
            }
        })
    }

    /// One heartbeat: publish state, persist it, rotate the log if due,
    /// refresh health when new results arrived, check memory.
    pub fn heartbeat(&self) {
        let stats = self.queue.stats();
        let memory_mb = memory_usage_mb().unwrap_or(0);
        let snapshot = HeartbeatState {
            pid: std::process::id(),
            started_at: self.started_at,
            uptime_ms: self.start_instant.elapsed().as_millis() as u64,
            last_heartbeat: Utc::now(),
            tasks_completed: stats.completed,
            tasks_queued: stats.queued,
            memory_usage_mb: memory_mb,
            scheduler_active: self.scheduler.is_active(),
            watcher_active: self.watcher.is_active(),
        };

        self.bus.emit(
            EventType::DaemonHeartbeat,
            serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
        );
        if let Err(e) = state::write_json(&self.state_dir.heartbeat_path(), &snapshot) {
            tracing::warn!("Failed to persist heartbeat state: {}", e);
        }

        self.log.rotate_if_needed();

        if self.health_dirty.swap(false, Ordering::SeqCst) {
            self.write_health_snapshot();
        }

        if memory_mb > self.config.memory_warn_mb {
            tracing::warn!(
                "Memory usage {} MB exceeds threshold {} MB",
                memory_mb,
                self.config.memory_warn_mb
            );
            self.log.warn(&format!(
                "Memory usage {} MB exceeds threshold {} MB",
                memory_mb, self.config.memory_warn_mb
            ));
            self.bus.emit(
                EventType::DaemonMemoryWarning,
                json!({ "memoryMb": memory_mb, "thresholdMb": self.config.memory_warn_mb }),
            );
        }
    }

    /// Build a snapshot from the result cache, persist it, extend history.
    fn write_health_snapshot(&self) {
        let results: Vec<ScanResult> = lock(&self.results).values().cloned().collect();
        if results.is_empty() {
            return;
        }
        let packages = count_packages(&self.config.workspace_root);
        let snapshot = health::build_snapshot(&results, &self.config.health_weights, packages);

        health::save_snapshot(&self.state_dir.health_path(), &snapshot);
        health::append_history(
            &self.state_dir.history_path(),
            &snapshot,
            self.config.history_retention_days,
        );
        self.bus.emit(
            EventType::HealthUpdated,
            json!({
                "score": snapshot.overall.score,
                "status": snapshot.overall.status,
            }),
        );
    }
}

/// Resident set size from /proc, in megabytes.
fn memory_usage_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Number of packages in the workspace, judged by manifest files.
fn count_packages(workspace_root: &Path) -> usize {
    WalkDir::new(workspace_root)
        .max_depth(4)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !ignore::should_skip(&entry.file_name().to_string_lossy())
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && matches!(
                    entry.file_name().to_str(),
                    Some("Cargo.toml") | Some("package.json")
                )
        })
        .count()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(temp: &TempDir) -> GuardianConfig {
        GuardianConfig::new(temp.path())
    }

    #[tokio::test]
    async fn test_start_writes_pid_and_stop_removes_it() {
        let temp = TempDir::new().unwrap();
        let daemon = Daemon::start(config_for(&temp)).unwrap();

        let pid_path = daemon.state_dir.pid_path();
        let recorded: u32 = std::fs::read_to_string(&pid_path)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(recorded, std::process::id());

        daemon.stop().await;
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_second_instance_refused_with_pid() {
        let temp = TempDir::new().unwrap();
        let daemon = Daemon::start(config_for(&temp)).unwrap();

        let err = Daemon::start(config_for(&temp)).unwrap_err();
        match err {
            GuardianError::AlreadyRunning { pid } => assert_eq!(pid, std::process::id()),
            other => panic!("unexpected error: {}", other),
        }
        // The pid file is untouched by the refused start
        assert!(daemon.state_dir.pid_path().exists());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_stale_pid_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let state_dir = StateDir::new(temp.path());
        state_dir.ensure().unwrap();
        // No live process can have this pid on Linux (max is far lower)
        std::fs::write(state_dir.pid_path(), "4194304999").unwrap();

        let daemon = Daemon::start(config_for(&temp)).unwrap();
        let recorded: u32 = std::fs::read_to_string(state_dir.pid_path())
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(recorded, std::process::id());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_reentrant() {
        let temp = TempDir::new().unwrap();
        let daemon = Daemon::start(config_for(&temp)).unwrap();
        daemon.stop().await;
        // Second call is a no-op
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_stop_sequence_emits_events_and_logs() {
        let temp = TempDir::new().unwrap();
        let daemon = Daemon::start(config_for(&temp)).unwrap();

        let stopping = Arc::new(AtomicBool::new(false));
        let stopping_clone = stopping.clone();
        let _sub = daemon.bus().subscribe(EventType::DaemonStopping, move |_| {
            stopping_clone.store(true, Ordering::SeqCst);
        });

        daemon.stop().await;
        assert!(stopping.load(Ordering::SeqCst));

        let log = std::fs::read_to_string(daemon.state_dir.log_path()).unwrap();
        assert!(log.contains("Daemon started"));
        assert!(log.contains("Daemon stopping"));
        assert!(log.contains("Daemon stopped"));
    }

    #[tokio::test]
    async fn test_heartbeat_writes_state_file() {
        let temp = TempDir::new().unwrap();
        let daemon = Daemon::start(config_for(&temp)).unwrap();
        daemon.heartbeat();

        let state: HeartbeatState =
            state::read_json(&daemon.state_dir.heartbeat_path()).unwrap();
        assert_eq!(state.pid, std::process::id());
        assert!(state.scheduler_active);
        daemon.stop().await;

        // Serialized form honors the documented key casing
        let raw = std::fs::read_to_string(daemon.state_dir.heartbeat_path()).unwrap();
        assert!(raw.contains("memoryUsageMB"));
        assert!(raw.contains("tasksCompleted"));
    }

    #[test]
    fn test_memory_usage_readable() {
        let mb = memory_usage_mb();
        assert!(mb.is_some());
    }

    #[test]
    fn test_count_packages() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("crates/a")).unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules/x")).unwrap();
        std::fs::write(temp.path().join("Cargo.toml"), "[workspace]").unwrap();
        std::fs::write(temp.path().join("crates/a/Cargo.toml"), "[package]").unwrap();
        std::fs::write(temp.path().join("node_modules/x/package.json"), "{}").unwrap();

        assert_eq!(count_packages(temp.path()), 2);
    }
}
