// crates/dcyfr-daemon/src/scheduler.rs
// Interval scheduler: periodic scanner triggers with catch-up and jitter

use crate::config::defaults::ScheduleDefault;
use crate::events::{EventBus, EventType};
use crate::queue::TaskQueue;
use crate::state;
use chrono::{Duration as ChronoDuration, Utc};
use dcyfr_types::{ScheduleEntry, TaskPriority, TaskSource};
use rand::Rng;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns the schedule set: built-in defaults merged with persisted run
/// markers, one timer task per enabled entry.
#[derive(Debug)]
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    bus: EventBus,
    persist_path: PathBuf,
    defaults: Vec<ScheduleDefault>,
    entries: Mutex<BTreeMap<String, ScheduleEntry>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Receiver<bool>>>,
    active: AtomicBool,
}

impl Scheduler {
    pub fn new(
        queue: Arc<TaskQueue>,
        bus: EventBus,
        persist_path: PathBuf,
        defaults: Vec<ScheduleDefault>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            bus,
            persist_path,
            defaults,
            entries: Mutex::new(BTreeMap::new()),
            timers: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(None),
            active: AtomicBool::new(false),
        })
    }

    /// Merge defaults with the persisted file. Every default is present;
    /// persisted `lastRun`/`nextRun`/`enabled` are inherited; entries no
    /// longer in the defaults vanish.
    pub fn load(&self) {
        let persisted: Vec<ScheduleEntry> = state::read_json(&self.persist_path).unwrap_or_default();
        let by_id: HashMap<String, ScheduleEntry> = persisted
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();

        let mut entries = self.lock_entries();
        entries.clear();
        for default in &self.defaults {
            let mut entry = ScheduleEntry {
                id: default.id.to_string(),
                name: default.name.to_string(),
                scanner: default.scanner.to_string(),
                interval_ms: default.interval_ms,
                enabled: default.enabled,
                last_run: None,
                next_run: None,
                options: None,
            };
            if let Some(saved) = by_id.get(default.id) {
                entry.last_run = saved.last_run;
                entry.next_run = saved.next_run;
                entry.enabled = saved.enabled;
            }
            entries.insert(entry.id.clone(), entry);
        }
    }

    /// Load the merged set, run startup catch-up, then arm a timer per
    /// enabled entry.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        self.load();
        *lock(&self.shutdown) = Some(shutdown.clone());
        self.active.store(true, Ordering::SeqCst);

        let caught_up = self.catch_up();
        if caught_up > 0 {
            tracing::info!("Scheduler caught up {} overdue entries", caught_up);
        }
        self.persist();

        let ids: Vec<String> = self
            .lock_entries()
            .values()
            .filter(|e| e.enabled)
            .map(|e| e.id.clone())
            .collect();
        for id in ids {
            self.arm(id, shutdown.clone());
        }
        tracing::info!("Scheduler started with {} entries", self.lock_entries().len());
    }

    /// Enqueue overdue entries at LOW priority and push their markers
    /// forward. An entry that has never run counts as overdue.
    fn catch_up(&self) -> usize {
        let now = Utc::now();
        let overdue: Vec<(String, String, u64)> = {
            let entries = self.lock_entries();
            entries
                .values()
                .filter(|entry| entry.enabled)
                .filter(|entry| match entry.last_run {
                    None => true,
                    Some(last) => now - last > ChronoDuration::milliseconds(entry.interval_ms as i64),
                })
                .map(|e| (e.id.clone(), e.scanner.clone(), e.interval_ms))
                .collect()
        };

        for (id, scanner, interval_ms) in &overdue {
            tracing::debug!("Catch-up: {} is overdue", id);
            self.queue
                .enqueue(scanner, TaskSource::Scheduler, TaskPriority::Low, None, None);
            let mut entries = self.lock_entries();
            if let Some(entry) = entries.get_mut(id) {
                entry.last_run = Some(now);
                entry.next_run = Some(now + ChronoDuration::milliseconds(*interval_ms as i64));
            }
        }
        overdue.len()
    }

    fn arm(self: &Arc<Self>, id: String, shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let timer_id = id.clone();
        let handle = tokio::spawn(async move { scheduler.run_entry(timer_id, shutdown).await });
        if let Some(previous) = lock(&self.timers).insert(id, handle) {
            previous.abort();
        }
    }

    async fn run_entry(self: Arc<Self>, id: String, shutdown: watch::Receiver<bool>) {
        loop {
            let delay = {
                let entries = self.lock_entries();
                let Some(entry) = entries.get(&id) else { return };
                if !entry.enabled {
                    return;
                }
                let interval = Duration::from_millis(entry.interval_ms);
                let until_next = entry
                    .next_run
                    .and_then(|next| (next - Utc::now()).to_std().ok())
                    .unwrap_or_default();
                until_next + jitter(interval)
            };

            tokio::time::sleep(delay).await;
            if *shutdown.borrow() {
                // A timer firing during shutdown is dropped
                return;
            }
            self.fire(&id);
        }
    }

    /// Enqueue the entry's scanner, record new run markers, persist, emit.
    fn fire(&self, id: &str) {
        let now = Utc::now();
        let scanner = {
            let mut entries = self.lock_entries();
            let Some(entry) = entries.get_mut(id) else { return };
            entry.last_run = Some(now);
            entry.next_run = Some(now + ChronoDuration::milliseconds(entry.interval_ms as i64));
            entry.scanner.clone()
        };

        self.queue
            .enqueue(&scanner, TaskSource::Scheduler, TaskPriority::Normal, None, None);
        self.persist();
        self.bus.emit(
            EventType::ScheduleTriggered,
            json!({ "id": id, "scanner": scanner }),
        );
    }

    /// Flip an entry while running; arms or cancels its timer immediately
    /// and always persists.
    pub fn set_enabled(self: &Arc<Self>, id: &str, enabled: bool) -> bool {
        let found = {
            let mut entries = self.lock_entries();
            match entries.get_mut(id) {
                Some(entry) => {
                    entry.enabled = enabled;
                    true
                }
                None => false,
            }
        };
        if !found {
            return false;
        }

        if enabled {
            if self.active.load(Ordering::SeqCst) {
                let shutdown = lock(&self.shutdown).clone();
                if let Some(shutdown) = shutdown {
                    self.arm(id.to_string(), shutdown);
                }
            }
        } else if let Some(timer) = lock(&self.timers).remove(id) {
            timer.abort();
        }

        self.persist();
        self.bus
            .emit(EventType::ScheduleUpdated, json!({ "id": id, "enabled": enabled }));
        true
    }

    /// Snapshot of the merged schedule set, sorted by id.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.lock_entries().values().cloned().collect()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancel every timer. Safe to call more than once.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        let timers: Vec<JoinHandle<()>> = lock(&self.timers).drain().map(|(_, h)| h).collect();
        for timer in timers {
            timer.abort();
        }
        tracing::debug!("Scheduler stopped");
    }

    /// Persistence failures are swallowed; memory remains authoritative.
    pub fn persist(&self) {
        let entries = self.entries();
        if let Err(e) = state::write_json(&self.persist_path, &entries) {
            tracing::warn!("Failed to persist schedules: {}", e);
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, ScheduleEntry>> {
        lock(&self.entries)
    }
}

/// Random delay in `[0, interval / 10)`, floored at zero for tiny intervals.
fn jitter(interval: Duration) -> Duration {
    let upper_ms = (interval.as_millis() / 10) as u64;
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..upper_ms))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
