//! TTL cache with namespaced keys and fail-open semantics.
//!
//! Keys are derived from a deterministic hash of the canonicalized request
//! payload, so identical requests map to the same entry regardless of field
//! order. Backend problems are counted and treated as misses; callers never
//! see a cache failure.

use perkon_core::config::{AutoTuneConfig, CacheConfig, CacheNamespace};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Counter snapshot exposed by [`TtlCache::stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// Direction the last auto-tune pass moved the TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneAction {
    Shrunk,
    Grew,
}

/// In-process TTL cache shared by the optimizer and the registry.
pub struct TtlCache {
    entries: Mutex<FxHashMap<String, CacheEntry>>,
    /// Current per-namespace TTLs; auto-tune adjusts these at runtime.
    ttls: RwLock<FxHashMap<CacheNamespace, Duration>>,
    auto_tune: AutoTuneConfig,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

impl TtlCache {
    pub fn new(config: &CacheConfig) -> Self {
        let mut ttls = FxHashMap::default();
        for ns in [
            CacheNamespace::Prediction,
            CacheNamespace::Feature,
            CacheNamespace::Metadata,
            CacheNamespace::BatchResult,
            CacheNamespace::ReferenceData,
        ] {
            ttls.insert(ns, config.ttl_for(ns));
        }
        Self {
            entries: Mutex::new(FxHashMap::default()),
            ttls: RwLock::new(ttls),
            auto_tune: config.auto_tune.clone(),
            max_entries: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Derives the cache key for a request payload: namespace, scope, and a
    /// hash of the canonicalized payload.
    pub fn key(namespace: CacheNamespace, scope: &str, payload: &serde_json::Value) -> String {
        let canonical = canonical_json(payload);
        let mut hasher = FxHasher::default();
        hasher.write(canonical.as_bytes());
        format!("{}:{}:{:016x}", namespace, scope, hasher.finish())
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a value under the namespace's current TTL.
    pub fn set(&self, namespace: CacheNamespace, key: &str, value: serde_json::Value) {
        let ttl = self.ttl_for(namespace);
        self.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.max_entries {
            Self::evict(&mut entries, self.max_entries / 10);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Serializes and stores a value; serialization failures are counted and
    /// swallowed so caching stays fail-open.
    pub fn set_json<T: serde::Serialize>(&self, namespace: CacheNamespace, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.set(namespace, key, json),
            Err(e) => {
                warn!("Cache set for {} failed to serialize: {}", key, e);
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    /// Drops every entry whose key starts with `prefix`. Returns how many
    /// were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Invalidated {} cache entries under {}", removed, prefix);
        }
        removed
    }

    /// Counts a backend failure. The caller proceeds as if the lookup missed.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
        let ttls = self.ttls.read().unwrap_or_else(|e| e.into_inner());
        ttls.get(&namespace)
            .copied()
            .unwrap_or(Duration::from_secs(300))
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            entries: entries.len(),
            hit_rate: self.hit_rate(),
        }
    }

    /// Nudges every namespace TTL based on the observed hit rate: a high
    /// rate means entries outlive their usefulness (shrink), a low rate
    /// means they expire before reuse (grow). Returns what was done, if
    /// anything.
    pub fn auto_tune(&self) -> Option<TuneAction> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        if hits + misses == 0 {
            return None;
        }

        let rate = self.hit_rate();
        let (factor, action) = if rate > self.auto_tune.high_hit_rate {
            (self.auto_tune.shrink_factor, TuneAction::Shrunk)
        } else if rate < self.auto_tune.low_hit_rate {
            (self.auto_tune.grow_factor, TuneAction::Grew)
        } else {
            return None;
        };

        let min = Duration::from_secs(self.auto_tune.min_ttl_secs);
        let max = Duration::from_secs(self.auto_tune.max_ttl_secs);
        let mut ttls = self.ttls.write().unwrap_or_else(|e| e.into_inner());
        for ttl in ttls.values_mut() {
            let scaled = ttl.mul_f64(factor);
            *ttl = scaled.clamp(min, max);
        }
        info!(
            "Cache auto-tune: hit rate {:.2}, TTLs {}",
            rate,
            match action {
                TuneAction::Shrunk => "shrunk",
                TuneAction::Grew => "grown",
            }
        );
        Some(action)
    }

    /// Evicts at least `target` entries, expired ones first.
    fn evict(entries: &mut FxHashMap<String, CacheEntry>, target: usize) {
        let target = target.max(1);
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .take(target)
            .collect();
        let mut removed = expired.len();
        for key in expired {
            entries.remove(&key);
        }
        while removed < target {
            let key = match entries.keys().next() {
                Some(k) => k.clone(),
                None => break,
            };
            entries.remove(&key);
            removed += 1;
        }
    }
}

/// Renders a JSON value with object keys sorted, so logically identical
/// payloads hash identically.
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}
