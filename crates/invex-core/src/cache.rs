//! Process-local caches keyed by entity id
//!
//! Entries live for the lifetime of the process. Every write path that
//! changes an entity's data must call [`EntityCache::invalidate`]; there is
//! no cross-process invalidation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct EntityCache<K, V> {
    entries: Mutex<HashMap<i64, HashMap<K, V>>>,
}

impl<K, V> Default for EntityCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> EntityCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, HashMap<K, V>>> {
        // A panic while holding the lock cannot leave a half-written map
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, entity_id: i64, key: &K) -> Option<V> {
        self.lock()
            .get(&entity_id)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    pub fn insert(&self, entity_id: i64, key: K, value: V) {
        self.lock().entry(entity_id).or_default().insert(key, value);
    }

    /// Return the cached value or compute, store and return it
    ///
    /// The lock is not held while `compute` runs, so concurrent misses may
    /// compute the same value twice.
    ///
    /// # Errors
    ///
    /// Propagates the error of `compute`; nothing is cached in that case.
    pub fn get_or_try_insert_with<E>(
        &self,
        entity_id: i64,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(entity_id, &key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(entity_id, key, value.clone());
        Ok(value)
    }

    /// Drop every entry of one entity
    pub fn invalidate(&self, entity_id: i64) {
        self.lock().remove(&entity_id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached entries across all entities
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_only_touches_one_entity() {
        let cache: EntityCache<&str, i64> = EntityCache::new();
        cache.insert(1, "a", 10);
        cache.insert(1, "b", 11);
        cache.insert(2, "a", 20);
        assert_eq!(cache.len(), 3);

        cache.invalidate(1);
        assert_eq!(cache.get(1, &"a"), None);
        assert_eq!(cache.get(2, &"a"), Some(20));
    }

    #[test]
    fn test_get_or_try_insert_with_caches_success_only() {
        let cache: EntityCache<(), i64> = EntityCache::new();
        let failed: Result<i64, &str> = cache.get_or_try_insert_with(5, (), || Err("boom"));
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let mut calls = 0;
        for _ in 0..2 {
            let value: Result<i64, &str> = cache.get_or_try_insert_with(5, (), || {
                calls += 1;
                Ok(42)
            });
            assert_eq!(value, Ok(42));
        }
        assert_eq!(calls, 1);
    }
}
