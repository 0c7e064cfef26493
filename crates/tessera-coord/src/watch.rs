//! Watch channel — change notifications from the coordination store
//!
//! The store delivers two families of events over a session: node-level
//! changes naming a path, and session-level state transitions. Watches
//! re-arm implicitly on every successful read of a path; nothing here
//! manages watch lifetimes.
//!
//! WatchChannel is the session-level fan-out a client implementation
//! drives: watchers subscribe once and see every event in subscription
//! order.

use std::sync::Arc;

use parking_lot::Mutex;

/// Change on a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    DataChanged,
    ChildrenChanged,
    Created,
    Deleted,
}

/// Session state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// Connection dropped; the session may still recover
    Disconnected,
    /// Connection (re)established
    Connected,
    /// Session is gone for good, along with every watch it held
    Expired,
}

/// One event delivered over the watch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Node { kind: NodeEventKind, path: String },
    Session { kind: SessionEventKind },
}

impl WatchEvent {
    pub fn node(kind: NodeEventKind, path: impl Into<String>) -> Self {
        WatchEvent::Node {
            kind,
            path: path.into(),
        }
    }

    pub fn session(kind: SessionEventKind) -> Self {
        WatchEvent::Session { kind }
    }
}

/// Receives watch events. Implementations must tolerate being called from
/// the client's event thread.
pub trait Watcher: Send + Sync {
    fn process(&self, event: &WatchEvent);
}

/// Ordered fan-out of session events to subscribed watchers.
pub struct WatchChannel {
    watchers: Mutex<Vec<Arc<dyn Watcher>>>,
}

impl WatchChannel {
    pub fn new() -> Self {
        Self {
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Add a watcher behind all existing ones.
    pub fn subscribe(&self, watcher: Arc<dyn Watcher>) {
        self.watchers.lock().push(watcher);
    }

    /// Deliver one event to every watcher in subscription order.
    ///
    /// The subscriber list is snapshotted first so a watcher may subscribe
    /// or dispatch reentrantly without deadlocking.
    pub fn dispatch(&self, event: &WatchEvent) {
        let snapshot: Vec<Arc<dyn Watcher>> = self.watchers.lock().clone();
        for watcher in snapshot {
            watcher.process(event);
        }
    }
}

impl Default for WatchChannel {
    fn default() -> Self {
        Self::new()
    }
}
