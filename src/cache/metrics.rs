//! Region Statistics
//!
//! Lock-free counters bumped on the hot path and read through a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Region counters
#[derive(Debug, Default)]
pub struct RegionStats {
    memory_hits: AtomicU64,
    auxiliary_hits: AtomicU64,
    misses: AtomicU64,
    expired_misses: AtomicU64,
    puts: AtomicU64,
    removes: AtomicU64,
    spools: AtomicU64,
    evictions: AtomicU64,
}

impl RegionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auxiliary_hit(&self) {
        self.auxiliary_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup found an element but it had expired
    pub fn record_expired_miss(&self) {
        self.expired_misses.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spool(&self) {
        self.spools.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed) + self.auxiliary_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups answered by any tier
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> RegionStatsSnapshot {
        RegionStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            auxiliary_hits: self.auxiliary_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_misses: self.expired_misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            spools: self.spools.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Point-in-time copy of [`RegionStats`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegionStatsSnapshot {
    pub memory_hits: u64,
    pub auxiliary_hits: u64,
    pub misses: u64,
    pub expired_misses: u64,
    pub puts: u64,
    pub removes: u64,
    pub spools: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}
