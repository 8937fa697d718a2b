//! Result cache.
//!
//! TTL-bounded memo of normalized URL → match outcome, including confirmed
//! negatives, so hot paths never reach the rule index. Entries are bounded by
//! an LRU capacity as well as by their expiry.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

#[cfg(feature = "async")]
use std::sync::Arc;

#[cfg(feature = "async")]
use crate::task::{stopped, TaskHandle};

/// Default time-to-live for cached outcomes
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default interval between expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default maximum number of cached URLs
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Textual "no match" answer for hosting layers that cannot return an option
pub const NO_MATCH_SENTINEL: &str = "@empty";

/// Cached result of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedOutcome {
    /// A resolved redirect target
    Redirect(String),
    /// Confirmed no match for this key
    NoMatch,
}

impl CachedOutcome {
    /// The redirect target, `None` for a negative entry
    pub fn into_target(self) -> Option<String> {
        match self {
            CachedOutcome::Redirect(target) => Some(target),
            CachedOutcome::NoMatch => None,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, CachedOutcome::NoMatch)
    }
}

impl From<Option<String>> for CachedOutcome {
    fn from(value: Option<String>) -> Self {
        value.map_or(CachedOutcome::NoMatch, CachedOutcome::Redirect)
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: CachedOutcome,
    expires_at: Instant,
}

/// Result cache options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// TTL used by [`ResultCache::set_default`]
    pub ttl: Duration,
    /// Interval of the background sweep
    pub sweep_interval: Duration,
    /// Maximum number of entries
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Cache counters, all atomic
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
    inserts: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hits that returned [`CachedOutcome::NoMatch`]
    pub fn negative_hits(&self) -> u64 {
        self.negative_hits.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Entries dropped because their TTL passed (on read or by sweep)
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}

/// TTL cache of lookup outcomes
pub struct ResultCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    /// Bumped by every [`clear`](ResultCache::clear) while holding `entries`
    generation: AtomicU64,
    options: CacheOptions,
    stats: CacheStats,
}

impl ResultCache {
    /// Create a cache. A capacity of zero is raised to one.
    pub fn new(options: CacheOptions) -> Self {
        let capacity = NonZeroUsize::new(options.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
            options,
            stats: CacheStats::default(),
        }
    }

    /// Store `value` under `key`, expiring `ttl` from now
    pub fn set(&self, key: impl Into<String>, value: CachedOutcome, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().put(key.into(), entry);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Store `value` with the configured TTL
    pub fn set_default(&self, key: impl Into<String>, value: CachedOutcome) {
        self.set(key, value, self.options.ttl);
    }

    /// Current generation; read it before computing a value to cache
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` with the configured TTL unless the cache was cleared
    /// since `generation` was read. Returns whether the value was stored.
    pub fn set_if_unchanged(
        &self,
        key: impl Into<String>,
        value: CachedOutcome,
        generation: u64,
    ) -> bool {
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.options.ttl,
        };
        entries.put(key.into(), entry);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Look up `key`. Entries past their expiry are treated as absent and
    /// dropped, whether or not a sweep has run.
    pub fn get(&self, key: &str) -> Option<CachedOutcome> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let found = entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));

        match found {
            Some((true, value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                if value.is_negative() {
                    self.stats.negative_hits.fetch_add(1, Ordering::Relaxed);
                }
                Some(value)
            }
            Some((false, _)) => {
                entries.pop(key);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        self.stats
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Number of entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and start a new generation
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` on the current tokio runtime.
    #[cfg(feature = "async")]
    pub fn spawn_sweeper(self: &Arc<Self>) -> TaskHandle {
        let (tx, mut rx) = tokio::sync::watch::channel(false);
        let cache = Arc::clone(self);
        let period = self.options.sweep_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can have expired yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stopped(&mut rx) => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = cache.len(), "swept expired cache entries");
                        }
                    }
                }
            }
        });

        TaskHandle::new("cache-sweeper", tx, vec![task])
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}
