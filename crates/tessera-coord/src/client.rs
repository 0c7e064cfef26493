//! Coordination client interface
//!
//! The cache talks to the coordination store through this trait. A real
//! implementation wraps the store's session-based client library; tests
//! script one. Every successful call installs a one-shot watch on the path
//! it touched, delivered through the session watch channel — callers never
//! manage watch lifetimes themselves.

use std::sync::Arc;

use crate::error::CoordResult;
use crate::watch::Watcher;

/// Node metadata as reported by the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stat {
    /// Data version, bumped on every write
    pub version: i32,
    /// Creation time, epoch millis
    pub ctime_ms: i64,
    /// Last modification time, epoch millis
    pub mtime_ms: i64,
    /// Length of the node's data in bytes
    pub data_length: u32,
    /// Number of direct children
    pub num_children: u32,
    /// Owning session id for ephemeral nodes; 0 for persistent ones
    pub ephemeral_owner: u64,
}

/// Session-based access to a hierarchical coordination store.
///
/// All three reads install a watch on `path` as a side effect of success.
pub trait CoordClient: Send + Sync {
    /// Probe for a node. Ok(None) means it does not exist — and a watch is
    /// armed to fire on its creation.
    fn exists(&self, path: &str) -> CoordResult<Option<Stat>>;

    /// Fetch a node's data and stat. NoNode if it vanished since the probe.
    fn get_data(&self, path: &str) -> CoordResult<(Vec<u8>, Stat)>;

    /// Fetch a node's children, in the store's canonical order.
    fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Register a watcher on the session's watch channel.
    fn add_watcher(&self, watcher: Arc<dyn Watcher>);
}
