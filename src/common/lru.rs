/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{hash::Hash, time::Instant};

use parking_lot::Mutex;

use super::cache::ResolverCache;

/// Size-bounded cache that evicts the least recently used answer and
/// discards answers whose TTL has elapsed.
pub struct LruCache<K: Hash + Eq, V> {
    inner: Mutex<lru_cache::LruCache<K, LruItem<V>, ahash::RandomState>>,
}

#[derive(Debug, Clone)]
struct LruItem<V> {
    item: V,
    valid_until: Instant,
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        LruCache {
            inner: Mutex::new(lru_cache::LruCache::with_hasher(
                capacity,
                ahash::RandomState::new(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> ResolverCache<K, V> for LruCache<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock();
        let entry = cache.get_mut(key)?;
        if entry.valid_until >= Instant::now() {
            entry.item.clone().into()
        } else {
            cache.remove(key);
            None
        }
    }

    fn insert(&self, key: K, item: V, valid_until: Instant) {
        self.inner.lock().insert(key, LruItem { item, valid_until });
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::common::cache::ResolverCache;

    use super::LruCache;

    #[test]
    fn lru_expiry_and_eviction() {
        let cache = LruCache::<String, u32>::with_capacity(2);
        let valid_until = Instant::now() + Duration::from_secs(60);

        cache.insert("a.example.".to_string(), 1, valid_until);
        cache.insert("b.example.".to_string(), 2, valid_until);
        assert_eq!(cache.get(&"a.example.".to_string()), Some(1));

        // "b" is now the least recently used entry
        cache.insert("c.example.".to_string(), 3, valid_until);
        assert_eq!(cache.get(&"b.example.".to_string()), None);
        assert_eq!(cache.get(&"a.example.".to_string()), Some(1));
        assert_eq!(cache.get(&"c.example.".to_string()), Some(3));

        cache.insert(
            "d.example.".to_string(),
            4,
            Instant::now() - Duration::from_secs(1),
        );
        assert_eq!(cache.get(&"d.example.".to_string()), None);
        assert_eq!(cache.len(), 1);
    }
}
