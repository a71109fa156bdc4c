//! TTL cache of serialized API responses
//!
//! Sits in front of the assemblers at the HTTP layer only. Keys are the route
//! plus its normalized query, e.g. `overview?exclude=Monero,Zcash`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::CacheConfig;

/// Thread-safe snapshot cache with TTL expiry and a size bound
pub struct SnapshotCache {
    entries: DashMap<String, CachedSnapshot>,
    ttl: Duration,
    max_entries: usize,
    stats: CacheStats,
}

struct CachedSnapshot {
    value: Value,
    cached_at: Instant,
}

impl CachedSnapshot {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Cache counters
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl SnapshotCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Cache for the `cache` config section, `None` when disabled
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        (config.enabled && !config.ttl.is_zero()).then(|| Self::new(config.ttl, config.max_entries))
    }

    /// Cached value for `key`, evicting it when expired
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store `value` under `key`
    ///
    /// When full, expired entries are swept first; if that frees nothing the
    /// oldest entry is dropped.
    pub fn set(&self, key: &str, value: Value) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key.to_string(),
            CachedSnapshot {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    /// Remove every expired entry
    pub fn evict_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().cached_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }

    /// Key for `route` with sorted, de-duplicated list parameters
    ///
    /// Empty parameters are left out so `/overview` and `/overview?exclude=`
    /// share an entry.
    #[must_use]
    pub fn build_key(route: &str, params: &[(&str, &[String])]) -> String {
        let query: Vec<String> = params
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| {
                let mut values = values.to_vec();
                values.sort();
                values.dedup();
                format!("{name}={}", values.join(","))
            })
            .collect();
        if query.is_empty() {
            route.to_string()
        } else {
            format!("{route}?{}", query.join("&"))
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
