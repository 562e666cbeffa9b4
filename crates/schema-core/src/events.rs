//! Event infrastructure for schema-core.
//!
//! Provides `SessionEvent` for progress reporting and monitoring, and
//! `EventBus` for subscriptions. Wrap the bus in `Arc` to subscribe.

use crate::sync_engine::SyncPhase;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by an editor session and its synchronization attempts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A synchronization attempt moved to a new phase.
    PhaseChanged {
        #[serde(rename = "operationId")]
        operation_id: u64,
        operation: String,
        phase: SyncPhase,
    },
    /// Step progress inside a multi-step operation.
    Progress {
        #[serde(rename = "operationId")]
        operation_id: u64,
        step: usize,
        total: usize,
        message: String,
    },
    /// A stored element could not be decoded and was loaded with empty properties.
    ElementRecovered { element: String, error: String },
    /// A field edit was recorded in the change ledger.
    EditTracked {
        #[serde(rename = "elementKey")]
        element_key: String,
        #[serde(rename = "propertyPath")]
        property_path: String,
    },
    /// The session document now matches the store at `version`.
    Committed {
        #[serde(rename = "operationId")]
        operation_id: u64,
        operation: String,
        version: u64,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Event bus for publishing session events to subscribers.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self
            .callbacks
            .read()
            .map(|guard| guard.len())
            .unwrap_or_default();
        f.debug_struct("EventBus")
            .field("subscribers", &subscribers)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn progress(step: usize) -> SessionEvent {
        SessionEvent::Progress {
            operation_id: 1,
            step,
            total: 3,
            message: "Writing".into(),
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(progress(1));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let sub = bus.subscribe(move |event| {
            if let SessionEvent::Progress { step, .. } = event {
                seen_clone.lock().unwrap().push(step);
            }
        });

        bus.emit(progress(1));
        drop(sub);
        bus.emit(progress(2));

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_session_event_serialization() {
        let event = SessionEvent::PhaseChanged {
            operation_id: 7,
            operation: "save".into(),
            phase: SyncPhase::CheckingRemoteVersion,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"phaseChanged\""));
        assert!(json.contains("\"operationId\":7"));
        assert!(json.contains("\"phase\":\"checkingRemoteVersion\""));
    }
}
