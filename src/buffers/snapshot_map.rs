//! A copy-on-write map for shared per-endpoint state. Readers get a cheap,
//!  point-in-time snapshot (an `Arc` clone) that is never invalidated by concurrent
//!  writers; writers clone-and-swap the whole map. This fits maps where entries are
//!  only inserted on first contact with a new endpoint and removed by an occasional
//!  idle sweep, and where the I/O loops must be able to iterate without holding a
//!  lock across their per-entry work.

use std::hash::Hash;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

pub struct SnapshotMap<K, V> {
    map: RwLock<Arc<FxHashMap<K, V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> Default for SnapshotMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> SnapshotMap<K, V> {
    pub fn new() -> SnapshotMap<K, V> {
        SnapshotMap {
            map: RwLock::new(Arc::new(FxHashMap::default())),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.read().unwrap().get(key).cloned()
    }

    /// a point-in-time view for iteration; concurrent updates do not affect it
    pub fn snapshot(&self) -> Arc<FxHashMap<K, V>> {
        self.map.read().unwrap().clone()
    }

    /// Applies a mutation by cloning the current map, running `f` on the clone, and
    ///  swapping it in. The write lock is held only around the swap-relevant section,
    ///  never around caller I/O.
    pub fn update(&self, f: impl FnOnce(&mut FxHashMap<K, V>)) {
        let mut guard = self.map.write().unwrap();
        let mut updated = (**guard).clone();
        f(&mut updated);
        *guard = Arc::new(updated);
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
