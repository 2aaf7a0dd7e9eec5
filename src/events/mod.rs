//! Live fan-out of task, geofence and heartbeat events.
//!
//! Nothing here is persisted. Producers record state before dispatching, so
//! an event with no listener is simply dropped.

use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{geofence::TransitionKind, state::AppState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    TaskEvent,
    GeofenceEvent,
    Heartbeat,
    StateTransition,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskEvent => "taskEvent",
            EventKind::GeofenceEvent => "geofenceEvent",
            EventKind::Heartbeat => "heartbeat",
            EventKind::StateTransition => "stateTransition",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: String,
    pub data: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub geofence_id: String,
    pub event_type: TransitionKind,
    pub action: String,
    pub latitude: f64,
    pub longitude: f64,
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatEvent {
    pub tick: u64,
    pub elapsed_ms: u64,
    /// `HH:MM:SS`
    pub clock: String,
    pub timer_view_id: Option<String>,
}

/// Reported for accepted and denied app-state transitions alike.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionEvent {
    pub from: AppState,
    pub to: AppState,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    TaskEvent(TaskEvent),
    GeofenceEvent(GeofenceEvent),
    Heartbeat(HeartbeatEvent),
    StateTransition(StateTransitionEvent),
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::TaskEvent(_) => EventKind::TaskEvent,
            EngineEvent::GeofenceEvent(_) => EventKind::GeofenceEvent,
            EngineEvent::Heartbeat(_) => EventKind::Heartbeat,
            EngineEvent::StateTransition(_) => EventKind::StateTransition,
        }
    }
}

pub type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Returned by [`EventDispatcher::add_listener`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(Uuid);

struct Subscription {
    id: Uuid,
    kind: EventKind,
    listener: Listener,
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let mut guard = match self.subscriptions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(Subscription {
            id,
            kind,
            listener: Arc::new(listener),
        });
        ListenerHandle(id)
    }

    /// Returns false when the handle was already removed.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut guard = match self.subscriptions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|subscription| subscription.id != handle.0);
        guard.len() != before
    }

    pub fn remove_all_listeners(&self) {
        let mut guard = match self.subscriptions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clear();
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        let guard = match self.subscriptions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.iter().any(|subscription| subscription.kind == kind)
    }

    /// Calls every listener subscribed to the event's kind on the current
    /// thread and returns how many ran to completion.
    pub fn dispatch(&self, event: &EngineEvent) -> usize {
        let kind = event.kind();
        // Listeners may subscribe or unsubscribe from inside the callback.
        let listeners: Vec<Listener> = {
            let guard = match self.subscriptions.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .iter()
                .filter(|subscription| subscription.kind == kind)
                .map(|subscription| subscription.listener.clone())
                .collect()
        };

        if listeners.is_empty() {
            log_debug!("No listener for {}, event dropped", kind.as_str());
            return 0;
        }

        let mut delivered = 0;
        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => log_warn!("A {} listener panicked; continuing", kind.as_str()),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task_event(task_id: &str) -> EngineEvent {
        EngineEvent::TaskEvent(TaskEvent {
            task_id: task_id.into(),
            data: serde_json::json!({"ok": true}),
            timestamp: 1,
        })
    }

    #[test]
    fn dispatch_without_listeners_drops_event() {
        let dispatcher = EventDispatcher::new();
        assert!(!dispatcher.has_listeners(EventKind::TaskEvent));
        assert_eq!(dispatcher.dispatch(&task_event("t")), 0);
    }

    #[test]
    fn only_matching_kind_is_called() {
        let dispatcher = EventDispatcher::new();
        let task_calls = Arc::new(AtomicUsize::new(0));
        let heartbeat_calls = Arc::new(AtomicUsize::new(0));

        let counter = task_calls.clone();
        dispatcher.add_listener(EventKind::TaskEvent, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = heartbeat_calls.clone();
        dispatcher.add_listener(EventKind::Heartbeat, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&task_event("t")), 1);
        assert_eq!(task_calls.load(Ordering::SeqCst), 1);
        assert_eq!(heartbeat_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = dispatcher.add_listener(EventKind::TaskEvent, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&task_event("t"));
        assert!(dispatcher.remove_listener(handle));
        assert!(!dispatcher.remove_listener(handle));
        dispatcher.dispatch(&task_event("t"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.add_listener(EventKind::TaskEvent, |_| panic!("listener bug"));
        let counter = calls.clone();
        dispatcher.add_listener(EventKind::TaskEvent, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&task_event("t")), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_dispatch() {
        let dispatcher = EventDispatcher::new();
        let slot: Arc<RwLock<Option<ListenerHandle>>> = Arc::new(RwLock::new(None));

        let inner = dispatcher.clone();
        let slot_for_listener = slot.clone();
        let handle = dispatcher.add_listener(EventKind::TaskEvent, move |_| {
            if let Some(handle) = *slot_for_listener.read().unwrap() {
                inner.remove_listener(handle);
            }
        });
        *slot.write().unwrap() = Some(handle);

        assert_eq!(dispatcher.dispatch(&task_event("t")), 1);
        assert!(!dispatcher.has_listeners(EventKind::TaskEvent));
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let json = serde_json::to_value(task_event("sync")).unwrap();
        assert_eq!(json["event"], "taskEvent");
        assert_eq!(json["payload"]["taskId"], "sync");
    }
}
