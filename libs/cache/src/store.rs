//! The time-based cache.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::CacheStats;

/// Expiry used when `now + ttl` would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Position of an entry in the expiry index. The sequence number breaks ties.
type Slot = (Instant, u64);

#[derive(Debug)]
struct Entry<V> {
    value: V,
    slot: Slot,
}

/// A capacity- and TTL-bounded map.
///
/// Lookups go through a hash map; eviction order comes from a `BTreeMap`
/// keyed by expiry, so picking the next victim is `O(log n)`.
#[derive(Debug)]
pub struct TimeBasedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Entry<V>>,
    expiry: BTreeMap<Slot, K>,
    next_seq: u64,
    stats: CacheStats,
}

impl<K, V> TimeBasedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache holding at most `capacity` entries.
    ///
    /// A capacity of zero disables the cache: `set` stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            expiry: BTreeMap::new(),
            next_seq: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns a clone of the value for `key` if it has not expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get_at(key, Instant::now())
    }

    /// Like [`get`](Self::get) with an explicit clock reading.
    pub fn get_at<Q>(&self, key: &Q, now: Instant) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        match self.entries.get(key) {
            Some(entry) if now < entry.slot.0 => {
                self.stats.hit();
                Some(entry.value.clone())
            }
            _ => {
                self.stats.miss();
                None
            }
        }
    }

    /// Borrow the value for `key` if live at `now`, without touching stats.
    pub fn peek_at<Q>(&self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|entry| now < entry.slot.0)
            .map(|entry| &entry.value)
    }

    /// Returns the expiry of the entry under `key`, even if it already lapsed.
    pub fn expires_at<Q>(&self, key: &Q) -> Option<Instant>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.slot.0)
    }

    /// Insert `value` under `key`, expiring `ttl` from now.
    pub fn set(&mut self, key: K, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    /// Like [`set`](Self::set) with an explicit clock reading.
    ///
    /// An existing entry for `key` is replaced. A zero `ttl` only removes it.
    pub fn set_at(&mut self, key: K, value: V, ttl: Duration, now: Instant) {
        self.delete(&key);
        if self.capacity == 0 || ttl.is_zero() {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.make_room(now);
        }

        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let slot = (expires_at, self.next_seq);
        self.next_seq += 1;
        self.expiry.insert(slot, key.clone());
        self.entries.insert(key, Entry { value, slot });
    }

    /// Replace the value for `key` with `edit(old)`, keeping its expiry.
    ///
    /// Does nothing if `key` is absent.
    pub fn swap<Q, F>(&mut self, key: &Q, edit: F)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> V,
    {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = edit(&entry.value);
        }
    }

    /// Remove `key`, returning its value even if expired.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        self.expiry.remove(&entry.slot);
        Some(entry.value)
    }

    /// Drop every entry expired at `now`.
    ///
    /// If nothing expired and the cache is over capacity, the entry expiring
    /// first is dropped instead. Returns the number of entries removed.
    pub fn evict(&mut self, now: Instant) -> usize {
        let mut removed = self.evict_expired(now);
        if removed == 0 {
            while self.entries.len() > self.capacity && self.evict_first() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.stats.evicted(removed as u64);
            debug!(removed, remaining = self.entries.len(), "evicted cache entries");
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        let removed = self.entries.len();
        self.entries.clear();
        self.expiry.clear();
        if removed > 0 {
            self.stats.evicted(removed as u64);
        }
    }

    /// Returns the keys of entries live at `now`, in expiry order.
    pub fn keys_at(&self, now: Instant) -> Vec<K> {
        self.expiry
            .iter()
            .filter(|((expires_at, _), _)| now < *expires_at)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Returns the keys of entries live now.
    pub fn keys(&self) -> Vec<K> {
        self.keys_at(Instant::now())
    }

    fn make_room(&mut self, now: Instant) {
        let mut removed = self.evict_expired(now);
        if removed == 0 && self.evict_first() {
            removed = 1;
        }
        self.stats.evicted(removed as u64);
    }

    fn evict_expired(&mut self, now: Instant) -> usize {
        let live = self.expiry.split_off(&(now, u64::MAX));
        let expired = std::mem::replace(&mut self.expiry, live);
        for key in expired.values() {
            self.entries.remove(key);
        }
        // An entry expiring exactly at `now` sorts before the split point.
        expired.len()
    }

    fn evict_first(&mut self) -> bool {
        match self.expiry.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_get_returns_live_value() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(4);
        cache.set_at("a", 1, SECOND, now);
        assert_eq!(cache.get_at("a", now), Some(1));
        assert_eq!(cache.get_at("b", now), None);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_peek_skips_stats() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(4);
        cache.set_at("a", 1, SECOND, now);
        assert_eq!(cache.peek_at("a", now), Some(&1));
        assert_eq!(cache.peek_at("a", now + SECOND), None);
        assert_eq!(cache.stats().snapshot().hits, 0);
    }

    #[test]
    fn test_lazy_expiry() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(4);
        cache.set_at("a", 1, SECOND, now);

        assert_eq!(cache.get_at("a", now + SECOND), None);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.evict(now + SECOND), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_expires_at_reports_lapsed_entries() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(4);
        cache.set_at("a", 1, SECOND, now);

        assert_eq!(cache.get_at("a", now + 2 * SECOND), None);
        assert_eq!(cache.expires_at("a"), Some(now + SECOND));

        cache.evict(now + 2 * SECOND);
        assert_eq!(cache.expires_at("a"), None);
    }

    #[test]
    fn test_set_replaces_existing() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(2);
        cache.set_at("a", 1, SECOND, now);
        cache.set_at("b", 2, SECOND, now);
        cache.set_at("a", 3, 10 * SECOND, now);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("a", now + 2 * SECOND), Some(3));
        assert_eq!(cache.get_at("b", now), Some(2));
    }

    #[test]
    fn test_capacity_evicts_earliest_expiry() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(2);
        cache.set_at("long", 1, 10 * SECOND, now);
        cache.set_at("short", 2, 2 * SECOND, now);
        cache.set_at("new", 3, 5 * SECOND, now);

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("short", now).is_none());
        assert_eq!(cache.get_at("long", now), Some(1));
        assert_eq!(cache.get_at("new", now), Some(3));
        assert_eq!(cache.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_insert_prefers_dropping_expired() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(2);
        cache.set_at("a", 1, SECOND, now);
        cache.set_at("b", 2, SECOND, now);
        let later = now + 5 * SECOND;
        cache.set_at("c", 3, SECOND, later);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys_at(later), vec!["c"]);
    }

    #[test]
    fn test_swap_keeps_expiry() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(2);
        cache.set_at("a", 1, SECOND, now);
        let before = cache.expires_at("a");

        cache.swap("a", |v| v + 10);
        cache.swap("missing", |v| v + 10);

        assert_eq!(cache.get_at("a", now), Some(11));
        assert_eq!(cache.expires_at("a"), before);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_and_zero_capacity_store_nothing() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(2);
        cache.set_at("a", 1, SECOND, now);
        cache.set_at("a", 2, Duration::ZERO, now);
        assert!(cache.is_empty());

        let mut disabled = TimeBasedCache::new(0);
        disabled.set_at("a", 1, SECOND, now);
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let now = Instant::now();
        let mut cache = TimeBasedCache::new(4);
        cache.set_at("a", 1, SECOND, now);
        cache.set_at("b", 2, SECOND, now);

        assert_eq!(cache.delete("a"), Some(1));
        assert_eq!(cache.delete("a"), None);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys_at(now).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_driven_expiry() {
        let mut cache = TimeBasedCache::new(4);
        cache.set("a", 1, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.evict(Instant::now()), 1);
        assert!(cache.keys().is_empty());
    }

    proptest! {
        #[test]
        fn prop_capacity_never_exceeded(
            capacity in 1usize..8,
            ttls in proptest::collection::vec(1u64..100, 1..40),
        ) {
            let now = Instant::now();
            let mut cache = TimeBasedCache::new(capacity);
            for (i, ttl) in ttls.iter().enumerate() {
                cache.set_at(i, i, Duration::from_secs(*ttl), now);
                prop_assert!(cache.len() <= capacity);
            }
        }

        #[test]
        fn prop_overflow_drops_earliest(
            ttls in proptest::collection::vec(1u64..1_000, 2..10),
        ) {
            let now = Instant::now();
            let capacity = ttls.len() - 1;
            let mut cache = TimeBasedCache::new(capacity);
            for (i, ttl) in ttls[..capacity].iter().enumerate() {
                cache.set_at(i, (), Duration::from_secs(*ttl), now);
            }
            let victim = (0..capacity)
                .min_by_key(|&i| (ttls[i], i))
                .unwrap();

            cache.set_at(capacity, (), Duration::from_secs(ttls[capacity]), now);

            prop_assert_eq!(cache.len(), capacity);
            prop_assert!(cache.expires_at(&victim).is_none());
        }
    }
}
