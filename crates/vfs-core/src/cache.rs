//! Path-keyed cache that shares live instances and optionally pins them.
//!
//! Values are held weakly, so an instance disappears from the cache as soon as the last
//! external `Arc` is dropped. Pinned values are additionally held strongly and survive
//! without external holders.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use crate::ignore_poison::IgnorePoison;

struct CacheInner<K, V> {
    items: HashMap<K, Weak<V>>,
    pinned: HashMap<K, Arc<V>>,
}

/// Weak/strong hybrid cache. One mutex guards the whole map; it is independent of any
/// lock inside the cached values.
pub struct SmartCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
}

impl<K, V> Default for SmartCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for SmartCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock_ignore_poison();
        f.debug_struct("SmartCache")
            .field("items", &inner.items.len())
            .field("pinned", &inner.pinned.len())
            .finish()
    }
}

impl<K, V> SmartCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                items: HashMap::new(),
                pinned: HashMap::new(),
            }),
        }
    }

    /// Returns the live value for `key`, or builds one with `factory` and caches it.
    ///
    /// `factory` runs under the cache lock so two concurrent callers never build two
    /// instances for the same key. `pin` pins the value whether it was found or created.
    pub fn get_or_create<F>(&self, key: K, factory: F, pin: bool) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        let mut inner = self.inner.lock_ignore_poison();
        let value = match inner.items.get(&key).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                let created = factory();
                // Slots of dropped values would otherwise pile up, one per key ever seen
                inner.items.retain(|_, weak| weak.strong_count() > 0);
                inner.items.insert(key.clone(), Arc::downgrade(&created));
                created
            }
        };
        if pin {
            inner.pinned.insert(key, Arc::clone(&value));
        }
        value
    }

    /// Returns the live value for `key` without creating one.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock_ignore_poison().items.get(key).and_then(Weak::upgrade)
    }

    /// True if a live value exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn is_pinned(&self, key: &K) -> bool {
        self.inner.lock_ignore_poison().pinned.contains_key(key)
    }

    /// Drops the strong pin; the value stays cached while external holders remain.
    pub fn unpin(&self, key: &K) -> bool {
        self.inner.lock_ignore_poison().pinned.remove(key).is_some()
    }

    /// All live values. Dead weak slots are pruned as a side effect.
    pub fn items(&self) -> Vec<Arc<V>> {
        let mut inner = self.inner.lock_ignore_poison();
        inner.items.retain(|_, weak| weak.strong_count() > 0);
        inner.items.values().filter_map(Weak::upgrade).collect()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weak slots currently held, dead or alive.
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.inner.lock_ignore_poison().items.len()
    }
}
