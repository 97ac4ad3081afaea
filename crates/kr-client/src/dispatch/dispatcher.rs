//! Per-role observer registry with cached state

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use kr_protocol::{NotificationEvent, ObserverRole};

use super::state::{fold, snapshot_events, HostSnapshot};
use crate::executor::DeliveryExecutor;

/// Receives notifications for the roles it registered for
pub trait Observer: Send + Sync + 'static {
    fn on_event(&self, event: &NotificationEvent);
}

struct FnObserver<F>(F);

impl<F> Observer for FnObserver<F>
where
    F: Fn(&NotificationEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &NotificationEvent) {
        (self.0)(event)
    }
}

/// Wrap a closure as an observer
pub fn observer_fn<F>(f: F) -> Arc<dyn Observer>
where
    F: Fn(&NotificationEvent) + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Default)]
struct RoleSlot {
    listeners: Vec<Arc<dyn Observer>>,
    cached: Option<NotificationEvent>,
    /// Bumped on every dispatch and connection loss
    generation: u64,
}

/// Per-role dispatch counters, taken before a full state query
#[derive(Debug, Clone, Default)]
pub struct DispatchMark(HashMap<ObserverRole, u64>);

/// Routes notifications to observers, one ordered queue per role.
///
/// Delivery jobs are enqueued while the role's slot is held, so an observer
/// sees events for a role in the order they were dispatched, and a late
/// registrant's initial state is never overtaken by a newer event.
pub struct NotificationDispatcher {
    slots: DashMap<ObserverRole, RoleSlot>,
    executor: Arc<dyn DeliveryExecutor>,
}

impl NotificationDispatcher {
    pub fn new(executor: Arc<dyn DeliveryExecutor>) -> Self {
        Self {
            slots: DashMap::new(),
            executor,
        }
    }

    fn deliver(&self, observer: &Arc<dyn Observer>, event: Arc<NotificationEvent>) {
        let observer = observer.clone();
        self.executor
            .execute(Box::new(move || observer.on_event(&event)));
    }

    /// Register `observer` for `role`.
    ///
    /// The observer immediately receives the cached state for the role, or
    /// `NoResultsYet` if nothing has been seen. Registering the same observer
    /// twice has no effect.
    pub fn register_observer(&self, role: ObserverRole, observer: Arc<dyn Observer>) {
        let mut slot = self.slots.entry(role).or_default();

        if slot.listeners.iter().any(|o| same_observer(o, &observer)) {
            tracing::debug!(%role, "Observer already registered");
            return;
        }

        let initial = slot
            .cached
            .clone()
            .unwrap_or(NotificationEvent::NoResultsYet(role));
        self.deliver(&observer, Arc::new(initial));

        slot.listeners.push(observer);
        tracing::debug!(%role, count = slot.listeners.len(), "Observer registered");
    }

    /// Remove `observer` from `role`. Returns whether it was registered.
    pub fn unregister_observer(&self, role: ObserverRole, observer: &Arc<dyn Observer>) -> bool {
        match self.slots.get_mut(&role) {
            Some(mut slot) => {
                let before = slot.listeners.len();
                slot.listeners.retain(|o| !same_observer(o, observer));
                before != slot.listeners.len()
            }
            None => false,
        }
    }

    /// Number of observers registered for `role`
    pub fn observer_count(&self, role: ObserverRole) -> usize {
        self.slots.get(&role).map(|s| s.listeners.len()).unwrap_or(0)
    }

    /// Last known state for `role`
    pub fn cached(&self, role: ObserverRole) -> Option<NotificationEvent> {
        self.slots.get(&role).and_then(|s| s.cached.clone())
    }

    /// Fold `event` into the cache and deliver it to the role's observers
    pub fn dispatch(&self, event: NotificationEvent) -> usize {
        let mut slot = self.slots.entry(event.role()).or_default();
        self.dispatch_in(&mut slot, event)
    }

    fn dispatch_in(&self, slot: &mut RoleSlot, event: NotificationEvent) -> usize {
        slot.cached = fold(slot.cached.take(), &event);
        slot.generation += 1;

        let event = Arc::new(event);
        for observer in &slot.listeners {
            self.deliver(observer, event.clone());
        }
        slot.listeners.len()
    }

    /// Current dispatch counters for every role
    pub fn mark(&self) -> DispatchMark {
        DispatchMark(
            self.slots
                .iter()
                .map(|slot| (*slot.key(), slot.generation))
                .collect(),
        )
    }

    /// Parse and dispatch an unsolicited notification frame
    pub fn dispatch_notification(&self, method: &str, params: &Value) {
        match NotificationEvent::from_notification(method, params) {
            Ok(Some(event)) => {
                tracing::debug!(method, "Dispatching notification");
                self.dispatch(event);
            }
            Ok(None) => {
                tracing::debug!(method, "Ignoring unhandled notification");
            }
            Err(e) => {
                tracing::warn!(method, "Dropping malformed notification: {}", e);
            }
        }
    }

    /// Publish a full state snapshot, as after a (re)connect.
    ///
    /// `since` is the mark taken before the snapshot was queried. A role that
    /// dispatched anything after it already holds newer state, so its part of
    /// the snapshot is dropped. Returns how many events were published.
    pub fn publish_snapshot(&self, snapshot: &HostSnapshot, since: &DispatchMark) -> usize {
        let mut published = 0;
        for event in snapshot_events(snapshot) {
            let role = event.role();
            let mut slot = self.slots.entry(role).or_default();
            if slot.generation != since.0.get(&role).copied().unwrap_or(0) {
                tracing::debug!(%role, "Refreshed state superseded by a newer notification");
                continue;
            }
            self.dispatch_in(&mut slot, event);
            published += 1;
        }
        published
    }

    /// Tell every role the connection is gone and forget cached state
    pub fn connection_lost(&self, reason: &str) {
        tracing::info!("Notifying observers of connection loss: {}", reason);

        for role in ObserverRole::ALL {
            let mut slot = self.slots.entry(role).or_default();
            slot.cached = None;
            slot.generation += 1;

            let event = Arc::new(NotificationEvent::ConnectionLost {
                role,
                reason: reason.to_string(),
            });
            for observer in &slot.listeners {
                self.deliver(observer, event.clone());
            }
        }
    }
}
