//! Bounded TTL cache with LRU eviction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{self, Clock};
use crate::observability::metrics;

/// Hit/miss counters and occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry<V> {
    value: V,
    created_at: Instant,
    /// `None` when the TTL is too large to represent.
    expires_at: Option<Instant>,
    /// Position in the recency index.
    tick: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, K>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        self.entries.remove(&key);
        self.evictions += 1;
        true
    }

    fn live(&self, now: Instant) -> usize {
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }
}

/// Thread-safe key/value cache with per-entry expiry.
pub struct TtlCache<K, V> {
    default_ttl: Duration,
    max_size: usize,
    state: Mutex<CacheState<K, V>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("default_ttl", &self.default_ttl)
            .field("max_size", &self.max_size)
            .field("stored", &self.state.lock().entries.len())
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self::with_clock(default_ttl, max_size, clock::system())
    }

    pub fn with_clock(default_ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_ttl,
            max_size,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            clock,
        }
    }

    /// Value for `key` if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let (expired, age) = match state.entries.get(key) {
            None => {
                state.misses += 1;
                metrics::record_cache_lookup(false);
                return None;
            }
            Some(entry) => (entry.is_expired(now), now.saturating_duration_since(entry.created_at)),
        };

        if expired {
            state.remove(key);
            state.expirations += 1;
            state.misses += 1;
            metrics::record_cache_lookup(false);
            tracing::debug!(age_secs = age.as_secs_f64(), "Cache entry expired");
            return None;
        }

        state.touch(key);
        state.hits += 1;
        tracing::debug!(age_secs = age.as_secs_f64(), "Cache hit");
        metrics::record_cache_lookup(true);
        state.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert or overwrite, with `ttl` or the cache default.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        if self.max_size == 0 {
            return;
        }
        let mut state = self.state.lock();
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);

        let existed = state.remove(&key).is_some();
        if !existed && state.entries.len() >= self.max_size {
            // Expired entries are already logically gone; drop them before
            // sacrificing a live one.
            state.purge_expired(now);
            while state.entries.len() >= self.max_size {
                if !state.evict_lru() {
                    break;
                }
                tracing::debug!("Evicted least recently used cache entry");
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.recency.insert(tick, key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                expires_at: now.checked_add(ttl),
                tick,
            },
        );
        tracing::debug!(ttl_secs = ttl.as_secs_f64(), "Cache set");
    }

    /// Live (unexpired) entry for `key`, without touching stats or recency.
    pub fn contains(&self, key: &K) -> bool {
        let state = self.state.lock();
        let now = self.clock.now();
        state.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.state.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.recency.clear();
        tracing::info!(count, "Cache cleared");
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.purge_expired(self.clock.now());
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired cache entries");
        }
        removed
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.lock().live(self.clock.now())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        CacheStats {
            size: state.live(self.clock.now()),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if total > 0 {
                state.hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + AsRef<str>,
    V: Clone,
{
    /// Drop every key containing `pattern`; returns how many were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut state = self.state.lock();
        let matching: Vec<K> = state
            .entries
            .keys()
            .filter(|k| k.as_ref().contains(pattern))
            .cloned()
            .collect();
        for key in &matching {
            state.remove(key);
        }
        if !matching.is_empty() {
            tracing::info!(count = matching.len(), pattern, "Invalidated cache keys matching pattern");
        }
        matching.len()
    }
}
