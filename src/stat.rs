//! Cache statistics
//!
//! Monotonic counters per named cache scope, intended for periodic
//! sampling rather than exact accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one named cache scope.
///
/// The counters only ever increase; sample them with
/// [`snapshot`](Self::snapshot) and diff between samples. Increments are
/// relaxed: nothing is ordered by them.
#[derive(Debug, Default)]
pub struct CacheStat {
    name: String,
    total: AtomicU64,
    hit: AtomicU64,
    miss: AtomicU64,
    db_fails: AtomicU64,
}

impl CacheStat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The scope name, used to identify log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn increment_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_db_fails(&self) {
        self.db_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            total: self.total.load(Ordering::Relaxed),
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            db_fails: self.db_fails.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`CacheStat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSnapshot {
    pub total: u64,
    pub hit: u64,
    pub miss: u64,
    pub db_fails: u64,
}

impl StatSnapshot {
    /// Hits as a fraction of total requests, `None` before any traffic.
    pub fn hit_ratio(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.hit as f64 / self.total as f64)
        }
    }
}
