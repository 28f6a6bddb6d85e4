//! Model-scoped cache metrics.
//!
//! Hits, misses, and retrieval time are tracked per logical model with
//! atomic counters behind a concurrent map, so increments never lock
//! and snapshot reads see a consistent per-model tuple. Snapshots are
//! immutable copies; mutating a snapshot cannot race the live counters.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ModelCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    retrieval_nanos: AtomicU64,
}

/// Live cache metrics registry.
#[derive(Default)]
pub struct CacheMetrics {
    per_model: DashMap<String, Arc<ModelCounters>>,
}

/// Immutable per-model snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub total_retrieval_nanos: u64,
}

impl ModelCacheSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn average_retrieval(&self) -> Duration {
        if self.hits == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_retrieval_nanos / self.hits)
        }
    }
}

/// Immutable aggregate snapshot across all models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub per_model: HashMap<String, ModelCacheSnapshot>,
}

impl CacheMetricsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.per_model.values().map(|m| m.hits).sum()
    }

    pub fn total_misses(&self) -> u64 {
        self.per_model.values().map(|m| m.misses).sum()
    }

    /// hits / (hits + misses), or 0 when nothing has been counted.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.total_hits();
        let total = hits + self.total_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn average_retrieval(&self) -> Duration {
        let hits = self.total_hits();
        if hits == 0 {
            return Duration::ZERO;
        }
        let nanos: u64 = self
            .per_model
            .values()
            .map(|m| m.total_retrieval_nanos)
            .sum();
        Duration::from_nanos(nanos / hits)
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, model: &str) -> Arc<ModelCounters> {
        self.per_model
            .entry(model.to_string())
            .or_default()
            .clone()
    }

    pub fn record_hit(&self, model: &str, retrieval: Duration) {
        let counters = self.counters(model);
        counters.hits.fetch_add(1, Ordering::Relaxed);
        counters
            .retrieval_nanos
            .fetch_add(retrieval.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_miss(&self, model: &str) {
        self.counters(model).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent copy of every per-model tuple: each counter is read
    /// once, and the returned map shares nothing with the live state.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let per_model = self
            .per_model
            .iter()
            .map(|entry| {
                let counters = entry.value();
                (
                    entry.key().clone(),
                    ModelCacheSnapshot {
                        hits: counters.hits.load(Ordering::Relaxed),
                        misses: counters.misses.load(Ordering::Relaxed),
                        total_retrieval_nanos: counters.retrieval_nanos.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        CacheMetricsSnapshot { per_model }
    }

    fn is_pristine(&self) -> bool {
        self.per_model.iter().all(|entry| {
            let c = entry.value();
            c.hits.load(Ordering::Relaxed) == 0
                && c.misses.load(Ordering::Relaxed) == 0
                && c.retrieval_nanos.load(Ordering::Relaxed) == 0
        })
    }

    /// Import previously persisted stats.
    ///
    /// Only applied when every current counter is zero, which makes the
    /// import idempotent: a second import against a warm registry is a
    /// no-op. Returns whether the import was applied.
    pub fn import(&self, persisted: &CacheMetricsSnapshot) -> bool {
        if !self.is_pristine() {
            tracing::debug!("skipping cache metrics import into a warm registry");
            return false;
        }
        for (model, snapshot) in &persisted.per_model {
            let counters = self.counters(model);
            counters.hits.store(snapshot.hits, Ordering::Relaxed);
            counters.misses.store(snapshot.misses, Ordering::Relaxed);
            counters
                .retrieval_nanos
                .store(snapshot.total_retrieval_nanos, Ordering::Relaxed);
        }
        true
    }
}
