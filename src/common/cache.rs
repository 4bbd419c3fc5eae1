/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{marker::PhantomData, time::Instant};

/// Storage for DNS answers. Implementations decide on eviction and must be
/// safe to share between concurrent verifications.
pub trait ResolverCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn insert(&self, key: K, value: V, valid_until: Instant);
}

/// Cache that never stores anything, every lookup goes to the transport.
pub struct NoCache<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> NoCache<K, V> {
    pub fn new() -> Self {
        NoCache(PhantomData)
    }
}

impl<K, V> Default for NoCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResolverCache<K, V> for NoCache<K, V> {
    fn get(&self, _: &K) -> Option<V> {
        None
    }

    fn insert(&self, _: K, _: V, _: Instant) {}
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{NoCache, ResolverCache};

    #[test]
    fn no_cache_never_stores() {
        let cache = NoCache::<String, u32>::new();
        cache.insert(
            "example.org.".to_string(),
            1,
            Instant::now() + Duration::from_secs(60),
        );
        assert_eq!(cache.get(&"example.org.".to_string()), None);
    }
}
