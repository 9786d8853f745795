// crates/dcyfr-daemon/src/events.rs
// In-process typed pub/sub bus decoupling the daemon's components
//
// The bus is intentionally synchronous: emitting invokes every listener in
// registration order inside the caller's execution context. It only carries
// notifications; scanner execution never routes through it.

use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// The closed set of event types the daemon emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    DaemonStarted,
    DaemonStopping,
    DaemonStopped,
    DaemonHeartbeat,
    DaemonMemoryWarning,
    TaskQueued,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskExpired,
    ScheduleTriggered,
    ScheduleUpdated,
    WatcherChange,
    WatcherError,
    ScanStarted,
    ScanCompleted,
    HealthUpdated,
}

impl EventType {
    /// Observable wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DaemonStarted => "daemon:started",
            Self::DaemonStopping => "daemon:stopping",
            Self::DaemonStopped => "daemon:stopped",
            Self::DaemonHeartbeat => "daemon:heartbeat",
            Self::DaemonMemoryWarning => "daemon:memory-warning",
            Self::TaskQueued => "task:queued",
            Self::TaskStarted => "task:started",
            Self::TaskCompleted => "task:completed",
            Self::TaskFailed => "task:failed",
            Self::TaskExpired => "task:expired",
            Self::ScheduleTriggered => "schedule:triggered",
            Self::ScheduleUpdated => "schedule:updated",
            Self::WatcherChange => "watcher:change",
            Self::WatcherError => "watcher:error",
            Self::ScanStarted => "scan:started",
            Self::ScanCompleted => "scan:completed",
            Self::HealthUpdated => "health:updated",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted event with its structured payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct BusInner {
    next_id: u64,
    /// (listener id, type filter, listener). `None` filter means "any".
    listeners: Vec<(u64, Option<EventType>, Listener)>,
}

/// Cheaply cloneable handle to the shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// Handle returned from subscribe; detaches the listener when used.
pub struct Subscription {
    inner: Arc<Mutex<BusInner>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Subscribe to one event type.
    pub fn subscribe<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.attach(Some(event_type), Arc::new(listener))
    }

    /// Subscribe to every event type.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.attach(None, Arc::new(listener))
    }

    fn attach(&self, filter: Option<EventType>, listener: Listener) -> Subscription {
        let id = {
            let mut inner = lock_or_recover(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, filter, listener));
            id
        };
        Subscription {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Emit an event to every matching listener, in registration order.
    ///
    /// Listeners run outside the bus lock so they may subscribe, emit, or
    /// enqueue work re-entrantly. A panicking listener is isolated: it is
    /// logged and the remaining listeners still run.
    pub fn emit(&self, event_type: EventType, data: serde_json::Value) {
        let event = Event::new(event_type, data);
        let matching: Vec<Listener> = {
            let inner = lock_or_recover(&self.inner);
            inner
                .listeners
                .iter()
                .filter(|(_, filter, _)| filter.is_none() || *filter == Some(event_type))
                .map(|(_, _, l)| l.clone())
                .collect()
        };

        for listener in matching {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!("Event listener panicked handling {}", event_type);
            }
        }
    }

    /// Detach every listener. Used by the supervisor's stop sequence.
    pub fn clear(&self) {
        lock_or_recover(&self.inner).listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        lock_or_recover(&self.inner).listeners.len()
    }
}

/// A poisoned bus lock only means a listener panicked while we held it;
/// the listener list itself is still coherent.
fn lock_or_recover(inner: &Arc<Mutex<BusInner>>) -> std::sync::MutexGuard<'_, BusInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_typed_subscriber() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _sub = bus.subscribe(EventType::TaskQueued, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventType::TaskQueued, json!({}));
        bus.emit(EventType::TaskStarted, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_all_sees_everything() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _sub = bus.subscribe_all(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventType::TaskQueued, json!({}));
        bus.emit(EventType::DaemonHeartbeat, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            let _ = bus.subscribe(EventType::TaskQueued, move |_| {
                order.lock().unwrap().push(i);
            });
        }

        bus.emit(EventType::TaskQueued, json!({}));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let sub = bus.subscribe(EventType::TaskQueued, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventType::TaskQueued, json!({}));
        sub.unsubscribe();
        bus.emit(EventType::TaskQueued, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _first = bus.subscribe(EventType::TaskQueued, |_| {
            panic!("listener exploded");
        });
        let hits_clone = hits.clone();
        let _second = bus.subscribe(EventType::TaskQueued, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventType::TaskQueued, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_emit_reentrantly() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        let _chain = bus.subscribe(EventType::TaskQueued, move |_| {
            bus_clone.emit(EventType::TaskStarted, json!({}));
        });
        let hits_clone = hits.clone();
        let _leaf = bus.subscribe(EventType::TaskStarted, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventType::TaskQueued, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_removes_all_listeners() {
        let bus = EventBus::new();
        let _a = bus.subscribe(EventType::TaskQueued, |_| {});
        let _b = bus.subscribe_all(|_| {});
        assert_eq!(bus.listener_count(), 2);
        bus.clear();
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::DaemonMemoryWarning.as_str(), "daemon:memory-warning");
        assert_eq!(EventType::TaskExpired.as_str(), "task:expired");
        assert_eq!(EventType::HealthUpdated.as_str(), "health:updated");
    }
}
