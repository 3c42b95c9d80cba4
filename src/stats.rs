//! In-process counters for the caching decorators.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters shared by the caching filter decorator and the caching consumer.
#[derive(Debug)]
pub struct CacheStats {
    /// Cache lookups performed for active routes
    pub lookups: AtomicU64,

    /// Lookups served from cache
    pub hits: AtomicU64,

    /// Lookups that fell through to the decorated filter or consumer
    pub misses: AtomicU64,

    /// Replies written into the cache
    pub stores: AtomicU64,

    /// Exchanges that skipped caching (no route, inactive route, no TTL)
    pub bypasses: AtomicU64,

    started_at: SystemTime,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub bypasses: u64,
    pub hit_rate: f64,
    pub uptime_seconds: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
            started_at: SystemTime::now(),
        }
    }

    pub fn record_hit(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of lookups served from cache, `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f64 / lookups as f64
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let uptime_seconds = SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or_default()
            .as_secs();

        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            uptime_seconds,
        }
    }

    /// Seconds since the UNIX epoch at which counting started.
    pub fn started_at_unix(&self) -> u64 {
        self.started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}
