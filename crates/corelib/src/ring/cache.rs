//! Bounded lookup cache attached to a ring.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::node::Target;

/// LRU cache from routing key to resolved target.
///
/// Lookups take `&self` so concurrent readers of a ring can share it; the
/// cache serializes on its own mutex. A capacity of zero disables caching.
#[derive(Debug)]
pub struct LookupCache {
    entries: Option<Mutex<LruCache<String, Target>>>,
}

impl LookupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn get(&self, key: &str) -> Option<Target> {
        self.entries.as_ref()?.lock().get(key).cloned()
    }

    pub fn insert(&self, key: &str, target: Target) {
        if let Some(entries) = &self.entries {
            entries.lock().put(key.to_string(), target);
        }
    }

    /// Drop every entry. Called on any ring mutation.
    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().cap().get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = LookupCache::new(0);
        cache.insert("k", Target::from("a:1"));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.capacity(), 0);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LookupCache::new(2);
        cache.insert("a", Target::from("a:1"));
        cache.insert("b", Target::from("b:1"));
        assert!(cache.get("a").is_some());
        cache.insert("c", Target::from("c:1"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = LookupCache::new(8);
        cache.insert("a", Target::from("a:1"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
