//! A bounded associative container that tracks access order.
//!
//! Entries are kept in a [`LinkedHashMap`] ordered from least to most recently used. A
//! successful [`LruCache::get`] or [`LruCache::put`] moves the entry to the most recent end.
//! Which entry is given up when room is needed is decided by an [`EvictionPolicy`]; the
//! default, [`LeastRecentlyUsed`], picks the oldest entry.

use std::hash::Hash;

use hashlink::LinkedHashMap;

/// Chooses an eviction victim from entries presented least recently used first
pub trait EvictionPolicy<K, V> {
    /// Return the key to evict, or `None` if no entry may be evicted
    fn select_victim<'a, I>(&self, entries: I) -> Option<K>
    where
        I: Iterator<Item = (&'a K, &'a V)>,
        K: 'a,
        V: 'a;
}

/// Evicts the least recently used entry unconditionally
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUsed;

impl<K: Clone, V> EvictionPolicy<K, V> for LeastRecentlyUsed {
    fn select_victim<'a, I>(&self, mut entries: I) -> Option<K>
    where
        I: Iterator<Item = (&'a K, &'a V)>,
        K: 'a,
        V: 'a,
    {
        entries.next().map(|(key, _)| key.clone())
    }
}

/// The cache is at capacity and the policy found nothing it may evict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheFull {
    pub capacity: usize,
}

#[derive(Debug)]
pub struct LruCache<K, V, P = LeastRecentlyUsed> {
    capacity: usize,
    entries: LinkedHashMap<K, V>,
    policy: P,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V, LeastRecentlyUsed> {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, LeastRecentlyUsed)
    }
}

impl<K, V, P> LruCache<K, V, P>
where
    K: Eq + Hash + Clone,
    P: EvictionPolicy<K, V>,
{
    pub fn with_policy(capacity: usize, policy: P) -> Self {
        Self {
            capacity,
            entries: LinkedHashMap::with_capacity(capacity),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up `key` and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let value = self.entries.remove(key)?;
        self.entries.insert(key.clone(), value);
        self.entries.back().map(|(_, value)| value)
    }

    /// Look up `key` without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or replace `key`, marking it most recently used.
    ///
    /// Inserting a new key into a full cache first evicts the policy's victim, which is
    /// returned. Fails with [`CacheFull`] if the policy refuses every entry.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<(K, V)>, CacheFull> {
        if self.entries.remove(&key).is_some() {
            self.entries.insert(key, value);
            return Ok(None);
        }
        let evicted = if self.is_full() {
            Some(self.evict().ok_or(CacheFull {
                capacity: self.capacity,
            })?)
        } else {
            None
        };
        self.entries.insert(key, value);
        Ok(evicted)
    }

    /// Remove and return the entry chosen by the eviction policy
    pub fn evict(&mut self) -> Option<(K, V)> {
        let victim = self.policy.select_victim(self.entries.iter())?;
        self.entries.remove_entry(&victim)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Entries from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}
