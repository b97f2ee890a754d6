// crates/vitrina-server/src/cache.rs
// Bounded LRU cache with per-entry TTL

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    inserted: Instant,
    /// Monotonic recency stamp; smallest = least recently used.
    touched: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    tick: u64,
}

/// Bounded LRU cache where every entry also expires after `ttl`.
///
/// Expiry is checked lazily on `get`; `cleanup_expired` sweeps the whole
/// structure (the janitor calls it periodically). On overflow `put` evicts
/// exactly one entry, the least recently used. All operations are atomic
/// under a single async lock.
pub struct TtlCache<V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value, refreshing its recency. Expired entries are dropped
    /// and reported as absent.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key)?;
        entry.touched = tick;
        Some(entry.value.clone())
    }

    /// Insert or update a value. Expired entries are swept first; if the
    /// cache then still exceeds capacity, the single LRU entry is evicted.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        let mut inner = self.inner.lock().await;
        Self::sweep(&mut inner.entries, self.ttl);
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            key.into(),
            Entry {
                value,
                inserted: Instant::now(),
                touched: tick,
            },
        );
        if inner.entries.len() > self.capacity {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru_key);
            }
        }
    }

    /// Sweep all expired entries, returning how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        Self::sweep(&mut inner.entries, self.ttl)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn sweep(entries: &mut HashMap<String, Entry<V>>, ttl: Duration) -> usize {
        let before = entries.len();
        entries.retain(|_, e| e.inserted.elapsed() <= ttl);
        before - entries.len()
    }
}
