//! Shared cache instances
//!
//! A process usually wants exactly one cache per coordination session.
//! CacheRegistry maps (connect_string, session_timeout) to a cache: the
//! first request constructs it, later requests get the extant instance.
//! Instances are never evicted. The registry itself is a collaborator the
//! embedding process owns — not a global — so tests can always start from
//! a fresh one.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::cache::CoordCache;
use crate::client::CoordClient;
use crate::config::CoordConfig;

/// Process-wide map of shared CoordCache instances.
pub struct CacheRegistry {
    instances: Mutex<HashMap<CoordConfig, Arc<CoordCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The cache for `config`, constructing it on first use.
    ///
    /// `connect` is only invoked when no instance exists yet; it builds the
    /// session client the new cache will own.
    pub fn get_or_create(
        &self,
        config: &CoordConfig,
        connect: impl FnOnce() -> Arc<dyn CoordClient>,
    ) -> Arc<CoordCache> {
        let mut instances = self.instances.lock();
        if let Some(cache) = instances.get(config) {
            return Arc::clone(cache);
        }
        let cache = CoordCache::new(connect());
        instances.insert(config.clone(), Arc::clone(&cache));
        cache
    }

    /// Number of live instances (diagnostics).
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}
