use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;

use crate::protocol::ProtocolId;

/// Bounds applied to the record TTL when inserting an entry.
const MIN_CACHE_TTL_S: u64 = 30;
const MAX_CACHE_TTL_S: u64 = 3600;

#[derive(Clone, Debug)]
struct LruEntry<V> {
    value: V,
    deadline_s: u64,
    touched: u64,
}

/// Small LRU map with expiry, shared by the address and FPC-DNS caches.
///
/// Updates are serialized by the owner (the detection module wraps each
/// cache in a `RefCell`); dissectors treat `get`/`put` as atomic.
#[derive(Clone, Debug)]
pub struct LruCache<K, V> {
    entries: HashMap<K, LruEntry<V>>,
    capacity: usize,
    clock: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> LruCache<K, V> {
        LruCache {
            entries: HashMap::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `key`, clamping the record TTL into the cache bounds.
    pub fn put(&mut self, key: K, value: V, now_s: u64, ttl_s: u64) {
        let ttl = ttl_s.clamp(MIN_CACHE_TTL_S, MAX_CACHE_TTL_S);
        self.clock += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one(now_s);
        }
        self.entries.insert(
            key,
            LruEntry {
                value,
                deadline_s: now_s.saturating_add(ttl),
                touched: self.clock,
            },
        );
    }

    /// Returns the live entry for `key`, refreshing its recency. Expired
    /// entries are dropped on sight.
    pub fn get(&mut self, key: &K, now_s: u64) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.deadline_s <= now_s,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(key).expect("entry just checked");
        entry.touched = clock;
        Some(&entry.value)
    }

    /// Prefers an expired entry; otherwise the least recently touched one.
    fn evict_one(&mut self, now_s: u64) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.deadline_s > now_s, entry.touched))
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

/// Reverse cache from an answered address to the hostname that resolved
/// to it.
pub type AddressCache = LruCache<IpAddr, String>;

/// First-packet-classification cache: answer address to the app protocol
/// last matched for its name.
pub type FpcDnsCache = LruCache<IpAddr, ProtocolId>;
