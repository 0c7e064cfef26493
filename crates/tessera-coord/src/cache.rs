//! Coordination cache — watched, immutable snapshots of store paths
//!
//! Three slots per path (data, stat, children) behind one mutex. Every
//! populating read installs a watch on the path it touched, and the watch
//! channel drives cache mutation in exactly one place: a node event evicts
//! that path's slots, session loss clears everything. Absence is a cached
//! state of its own — once the exists probe says "no such node", repeated
//! lookups answer locally until the creation watch fires.
//!
//! Populating reads run inside a bounded-backoff retry loop. Transient
//! client errors and the probe/read concurrent-modification race both
//! re-enter the loop; the transient outcome is never cached.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use rand::Rng;

use crate::client::{CoordClient, Stat};
use crate::error::{CoordError, CoordResult};
use crate::watch::{SessionEventKind, WatchEvent, Watcher};

/// First retry sleep
const RETRY_START: Duration = Duration::from_millis(100);

/// Retry sleep ceiling
const RETRY_CAP: Duration = Duration::from_secs(10);

struct Slots {
    /// None = negatively cached: the node is known absent
    data: HashMap<String, Option<Vec<u8>>>,
    stats: HashMap<String, Stat>,
    /// None = negatively cached, as for data
    children: HashMap<String, Option<Vec<String>>>,
}

/// Process-local cache over one coordination session.
///
/// Coupled 1:1 to its session: session loss clears every slot. Callers get
/// snapshot copies; nothing borrowed from the cache outlives the call.
pub struct CoordCache {
    client: Arc<dyn CoordClient>,
    slots: Mutex<Slots>,
}

/// The single place watch events mutate the cache. Chains an optional
/// external watcher after the internal handler has run.
struct CacheWatcher {
    cache: Weak<CoordCache>,
    external: Option<Arc<dyn Watcher>>,
}

impl Watcher for CacheWatcher {
    fn process(&self, event: &WatchEvent) {
        if let Some(cache) = self.cache.upgrade() {
            cache.apply_event(event);
        }
        if let Some(external) = &self.external {
            external.process(event);
        }
    }
}

impl CoordCache {
    /// Build a cache over `client` and register its event handler on the
    /// session watch channel.
    pub fn new(client: Arc<dyn CoordClient>) -> Arc<CoordCache> {
        Self::with_external_watcher(client, None)
    }

    /// As new(), additionally chaining `external` behind the internal
    /// handler: it sees every event after the cache has reacted to it.
    pub fn with_external_watcher(
        client: Arc<dyn CoordClient>,
        external: Option<Arc<dyn Watcher>>,
    ) -> Arc<CoordCache> {
        let cache = Arc::new(CoordCache {
            client: Arc::clone(&client),
            slots: Mutex::new(Slots {
                data: HashMap::new(),
                stats: HashMap::new(),
                children: HashMap::new(),
            }),
        });
        client.add_watcher(Arc::new(CacheWatcher {
            cache: Arc::downgrade(&cache),
            external,
        }));
        cache
    }

    /// Cached node data; None if the node does not exist. Populates (and
    /// arms the watch) on miss.
    pub fn get_data(&self, path: &str) -> CoordResult<Option<Vec<u8>>> {
        Ok(self.populate_data(path)?.0)
    }

    /// As get_data, plus a copy of the node's stat (None when absent).
    pub fn get_data_with_stat(&self, path: &str) -> CoordResult<(Option<Vec<u8>>, Option<Stat>)> {
        self.populate_data(path)
    }

    /// Cached child list in store order; None if the node does not exist.
    pub fn get_children(&self, path: &str) -> CoordResult<Option<Vec<String>>> {
        self.retry("get_children", path, |cache| {
            // Same lock discipline as populate_data: no event may evict
            // between the watch-arming read and the slot write
            let mut slots = cache.slots.lock();
            if let Some(children) = slots.children.get(path) {
                return Ok(Some(children.clone()));
            }

            match cache.client.get_children(path) {
                Ok(names) => {
                    slots
                        .children
                        .insert(path.to_string(), Some(names.clone()));
                    Ok(Some(Some(names)))
                }
                Err(CoordError::NoNode { .. }) => {
                    // Absence may only be recorded off the exists probe,
                    // which also arms the creation watch
                    match cache.client.exists(path)? {
                        None => {
                            slots.children.insert(path.to_string(), None);
                            Ok(Some(None))
                        }
                        Some(_) => Ok(None),
                    }
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Drop every slot.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.data.clear();
        slots.stats.clear();
        slots.children.clear();
    }

    /// Drop every slot whose path starts with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) {
        let mut slots = self.slots.lock();
        slots.data.retain(|path, _| !path.starts_with(prefix));
        slots.stats.retain(|path, _| !path.starts_with(prefix));
        slots.children.retain(|path, _| !path.starts_with(prefix));
    }

    fn populate_data(&self, path: &str) -> CoordResult<(Option<Vec<u8>>, Option<Stat>)> {
        self.retry("get_data", path, |cache| {
            // Held across the probe and read: the watch armed by exists()
            // must not fire and evict before this populate has written its
            // slot, or a stale absence would survive with no watch left
            let mut slots = cache.slots.lock();
            if let Some(data) = slots.data.get(path) {
                return Ok(Some((data.clone(), slots.stats.get(path).cloned())));
            }

            // The probe arms the watch and alone decides negative caching
            let probe = match cache.client.exists(path)? {
                None => {
                    slots.data.insert(path.to_string(), None);
                    slots.stats.remove(path);
                    return Ok(Some((None, None)));
                }
                Some(stat) => stat,
            };
            debug!("populating {} at version {}", path, probe.version);

            match cache.client.get_data(path) {
                Ok((bytes, stat)) => {
                    slots.data.insert(path.to_string(), Some(bytes.clone()));
                    slots.stats.insert(path.to_string(), stat.clone());
                    Ok(Some((Some(bytes), Some(stat))))
                }
                // Deleted or rewritten between probe and read; go around
                Err(CoordError::NoNode { .. }) | Err(CoordError::BadVersion { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// Bounded-backoff retry. Ok(None) from `attempt` is the concurrent
    /// modification sentinel; transient errors loop as well. Terminates
    /// only on success or a non-transient error.
    fn retry<T>(
        &self,
        what: &str,
        path: &str,
        mut attempt: impl FnMut(&Self) -> CoordResult<Option<T>>,
    ) -> CoordResult<T> {
        let mut sleep = RETRY_START;
        loop {
            match attempt(self) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    debug!("{} {} raced a concurrent modification, retrying", what, path);
                }
                Err(e) if e.is_transient() => {
                    warn!("{} {} failed ({}), retrying in {:?}", what, path, e, sleep);
                }
                Err(e) => return Err(e),
            }

            thread::sleep(sleep);
            let factor = rand::thread_rng().gen_range(1.0..2.0);
            sleep = Duration::from_secs_f64(
                (sleep.as_secs_f64() * factor).min(RETRY_CAP.as_secs_f64()),
            );
        }
    }

    fn apply_event(&self, event: &WatchEvent) {
        match event {
            WatchEvent::Node { path, kind } => {
                debug!("evicting {} on {:?}", path, kind);
                let mut slots = self.slots.lock();
                slots.data.remove(path);
                slots.stats.remove(path);
                slots.children.remove(path);
            }
            WatchEvent::Session {
                kind: SessionEventKind::Disconnected | SessionEventKind::Expired,
            } => {
                warn!("coordination session lost, clearing cache");
                self.clear();
            }
            WatchEvent::Session {
                kind: SessionEventKind::Connected,
            } => {
                // Watches re-arm on the next populating read
            }
        }
    }
}
