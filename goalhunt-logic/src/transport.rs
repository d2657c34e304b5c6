use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::watch;

use crate::messages::{ClientEvent, ServerEvent, ServerEventKind};

/// Lifecycle of the persistent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Read-only view of a transport's connection state. Owned by the transport, anyone else only
/// holds one of these.
#[derive(Debug, Clone)]
pub struct ConnectionHandle(watch::Receiver<ConnectionState>);

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Wait for the next state change, `None` if the transport is gone
    pub async fn changed(&mut self) -> Option<ConnectionState> {
        self.0.changed().await.ok()?;
        Some(*self.0.borrow_and_update())
    }

    /// Wait until the connection is in `state`, returns false if the transport went away first
    pub async fn wait_for(&mut self, state: ConnectionState) -> bool {
        self.0.wait_for(|s| *s == state).await.is_ok()
    }
}

/// Write side of a [ConnectionHandle], transports keep one of these
#[derive(Debug)]
pub struct ConnectionTracker(watch::Sender<ConnectionState>);

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self(watch::Sender::new(ConnectionState::Disconnected))
    }
}

impl ConnectionTracker {
    pub fn set(&self, state: ConnectionState) {
        self.0.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                log::debug!("Connection {current:?} -> {state:?}");
                *current = state;
                true
            }
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.0.subscribe())
    }
}

pub type EventHandler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

type SharedHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Handlers registered per inbound event kind. Every handler for a kind fires, in registration
/// order. Handlers run outside the registry's lock, so they may register, clear or disconnect.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<ServerEventKind, Vec<SharedHandler>>>,
}

impl HandlerRegistry {
    pub fn register(&self, kind: ServerEventKind, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::from(handler));
    }

    /// Run every handler for this event's kind, returns how many ran
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let for_kind = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for handler in &for_kind {
            handler(event);
        }
        for_kind.len()
    }

    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One persistent, bidirectional connection to the goal server
pub trait Transport: Send + Sync {
    /// Start connecting to `address`. Calling this while already connecting or connected hands
    /// back the existing connection's handle instead of opening a second one. Failures are never
    /// surfaced here, the handle simply doesn't reach [ConnectionState::Connected].
    fn connect(&self, address: &str) -> ConnectionHandle;
    /// Get a handle on the current connection
    fn handle(&self) -> ConnectionHandle;
    /// Push an event, at most once. Does nothing when not connected.
    fn send(&self, event: ClientEvent) -> impl Future<Output = ()> + Send;
    /// Register a handler for one kind of inbound event
    fn on(&self, kind: ServerEventKind, handler: EventHandler);
    /// Drop the connection and every registered handler, safe to call more than once
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::coordinate::Coordinate;

    #[test]
    fn test_all_handlers_fire() {
        let registry = HandlerRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            registry.register(
                ServerEventKind::GoalReached,
                Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert_eq!(registry.dispatch(&ServerEvent::GoalReached), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let goal = ServerEvent::GoalLocation(Coordinate::new(1.0, 1.0).unwrap());
        assert_eq!(registry.dispatch(&goal), 0, "Wrong kind dispatched");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&ServerEvent::GoalReached), 0);
    }

    #[test]
    fn test_handler_can_reenter_registry() {
        let registry = Arc::new(HandlerRegistry::default());

        registry.register(ServerEventKind::GoalReached, {
            let registry = registry.clone();
            Box::new(move |_| {
                registry.register(ServerEventKind::GoalLocation, Box::new(|_| {}));
                registry.clear();
            })
        });

        assert_eq!(registry.dispatch(&ServerEvent::GoalReached), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&ServerEvent::GoalReached), 0);
    }

    #[tokio::test]
    async fn test_tracker_notifies_changes_only() {
        let tracker = ConnectionTracker::default();
        let mut handle = tracker.handle();

        tracker.set(ConnectionState::Disconnected);
        assert!(!handle.0.has_changed().unwrap(), "Same state counted as change");

        tracker.set(ConnectionState::Connecting);
        tracker.set(ConnectionState::Connected);
        assert_eq!(handle.changed().await, Some(ConnectionState::Connected));
        assert!(handle.is_connected());

        drop(tracker);
        assert_eq!(handle.changed().await, None);
    }
}
