//! Bounded, single-flight in-memory cache.
//!
//! Loaded values live in an LRU. A key whose load is still running lives in a
//! separate in-flight map instead, which eviction never touches, so exactly
//! one load per key runs at a time. Concurrent callers for the same key wait
//! on its slot and share the result, while callers for other keys proceed
//! independently. A failed load is not kept, so a later call retries.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use lru::LruCache;
use tracing::{debug, trace, warn};

use crate::error::Result;

pub type Loader<K, V> = Arc<dyn Fn(&K) -> Result<V> + Send + Sync>;
pub type EvictionListener<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

type Slot<V> = Arc<OnceLock<Option<V>>>;

struct Entries<K, V> {
    loaded: LruCache<K, V, ahash::RandomState>,
    in_flight: HashMap<K, Slot<V>, ahash::RandomState>,
}

pub struct TileCache<K, V> {
    name: String,
    entries: Mutex<Entries<K, V>>,
    loader: Loader<K, V>,
    on_evict: Option<EvictionListener<K, V>>,
}

impl<K, V> TileCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: impl Into<String>, capacity: NonZeroUsize, loader: Loader<K, V>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(Entries {
                loaded: LruCache::with_hasher(capacity, ahash::RandomState::new()),
                in_flight: HashMap::with_hasher(ahash::RandomState::new()),
            }),
            loader,
            on_evict: None,
        }
    }

    /// Called with every loaded value that leaves the cache.
    #[must_use]
    pub fn with_eviction_listener(mut self, listener: EvictionListener<K, V>) -> Self {
        self.on_evict = Some(listener);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Entries<K, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value for `key`, loading it if needed.
    ///
    /// Returns `None` when the load failed; the failure is logged and the key
    /// stays uncached.
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = {
            let mut entries = self.lock();
            if let Some(value) = entries.loaded.get(key) {
                trace!(cache = %self.name, ?key, "hit");
                return Some(value.clone());
            }
            match entries.in_flight.get(key) {
                Some(slot) => {
                    trace!(cache = %self.name, ?key, "waiting on in-flight load");
                    Arc::clone(slot)
                }
                None => {
                    trace!(cache = %self.name, ?key, "miss");
                    let slot: Slot<V> = Arc::new(OnceLock::new());
                    entries.in_flight.insert(key.clone(), Arc::clone(&slot));
                    slot
                }
            }
        };

        let value = slot
            .get_or_init(|| match (self.loader)(key) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(cache = %self.name, ?key, %error, "tile load failed");
                    None
                }
            })
            .clone();

        // The first caller back from the slot moves its value into the LRU.
        let evicted = {
            let mut entries = self.lock();
            let owns_slot = entries
                .in_flight
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &slot));
            if owns_slot {
                entries.in_flight.remove(key);
                value
                    .as_ref()
                    .and_then(|value| entries.loaded.push(key.clone(), value.clone()))
            } else {
                None
            }
        };
        if let Some((old_key, old_value)) = evicted {
            self.notify_evicted(&old_key, &old_value);
        }

        value
    }

    /// Drops every loaded entry, notifying the eviction listener.
    ///
    /// Loads still in flight are left to finish and are cached when they do.
    pub fn invalidate_all(&self) {
        let drained: Vec<(K, V)> = {
            let mut entries = self.lock();
            std::iter::from_fn(|| entries.loaded.pop_lru()).collect()
        };
        debug!(cache = %self.name, entries = drained.len(), "invalidated");
        for (key, value) in &drained {
            self.notify_evicted(key, value);
        }
    }

    fn notify_evicted(&self, key: &K, value: &V) {
        trace!(cache = %self.name, ?key, "evicted");
        if let Some(listener) = &self.on_evict {
            listener(key, value);
        }
    }

    /// Number of loaded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().loaded.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().loaded.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.lock().loaded.contains(key)
    }

    #[must_use]
    pub fn capacity(&self) -> NonZeroUsize {
        self.lock().loaded.cap()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
