//! # Response Cache
//!
//! Fingerprint-keyed cache for non-streaming chat and embedding
//! responses. The store is internally concurrent (dashmap + atomic
//! counters); policies are pluggable along three axes:
//!
//! - **TTL** ([`ttl::TtlPolicy`]): fixed, sliding, adaptive, time-based.
//! - **Eviction** ([`eviction::EvictionPolicy`]): LRU, LFU, priority,
//!   composite.
//! - **Size** ([`size::SizePolicy`]): item count, memory bytes, dynamic,
//!   tiered.
//!
//! Values are stored as serialized JSON so one store serves every
//! cacheable response type. Per-model hit/miss/latency metrics live in
//! [`metrics::CacheMetrics`]; snapshots are immutable copies.
//!
//! The cache itself makes no at-most-once promise for concurrent misses
//! on one fingerprint: callers needing single-flight semantics layer
//! request coalescing above it.

pub mod eviction;
pub mod fingerprint;
pub mod metrics;
pub mod size;
pub mod ttl;

use chrono::Timelike;
use eviction::{EntryView, EvictionPolicy};
use metrics::{CacheMetrics, CacheMetricsSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use size::SizePolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use ttl::TtlPolicy;

use dashmap::DashMap;

/// Per-entry bookkeeping.
#[derive(Debug, Clone)]
struct EntryMetadata {
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    size_bytes: u64,
    priority: u8,
    base_ttl: Duration,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    metadata: EntryMetadata,
}

/// Concurrent response cache with pluggable policies.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl_policy: TtlPolicy,
    eviction_policy: EvictionPolicy,
    size_policy: SizePolicy,
    metrics: CacheMetrics,
    default_ttl: Duration,
    total_bytes: AtomicU64,
    dynamic_state: Mutex<DynamicState>,
}

struct DynamicState {
    last_recalc: Instant,
    effective_max_bytes: u64,
}

impl ResponseCache {
    pub fn new(
        default_ttl: Duration,
        ttl_policy: TtlPolicy,
        eviction_policy: EvictionPolicy,
        size_policy: SizePolicy,
    ) -> Result<Self, String> {
        size_policy.validate()?;
        Ok(Self {
            entries: DashMap::new(),
            ttl_policy,
            eviction_policy,
            size_policy,
            metrics: CacheMetrics::new(),
            default_ttl,
            total_bytes: AtomicU64::new(0),
            dynamic_state: Mutex::new(DynamicState {
                last_recalc: Instant::now(),
                effective_max_bytes: 0,
            }),
        })
    }

    /// LRU over an item-count bound, the production default.
    pub fn with_defaults(default_ttl: Duration, max_entries: usize) -> Self {
        Self::new(
            default_ttl,
            TtlPolicy::Fixed,
            EvictionPolicy::Lru,
            SizePolicy::ItemCount {
                max_items: max_entries.max(1),
            },
        )
        .unwrap_or_else(|_| unreachable!("default policies always validate"))
    }

    fn hour_now() -> u8 {
        chrono::Utc::now().hour() as u8
    }

    fn entry_expired(&self, metadata: &EntryMetadata) -> bool {
        if let Some(expires_at) = metadata.expires_at {
            if Instant::now() >= expires_at {
                return true;
            }
        }
        self.ttl_policy.is_expired(
            metadata.base_ttl,
            metadata.created_at.elapsed(),
            metadata.last_accessed_at.elapsed(),
            metadata.access_count,
            Self::hour_now(),
        )
    }

    /// Look up a fingerprint, recording hit or miss for `model`.
    pub fn get(&self, key: &str, model: &str) -> Option<serde_json::Value> {
        let started = Instant::now();

        let expired = {
            match self.entries.get_mut(key) {
                None => {
                    self.metrics.record_miss(model);
                    return None;
                }
                Some(mut entry) => {
                    if self.entry_expired(&entry.metadata) {
                        true
                    } else {
                        entry.metadata.last_accessed_at = Instant::now();
                        entry.metadata.access_count += 1;
                        let value = entry.value.clone();
                        drop(entry);
                        self.metrics.record_hit(model, started.elapsed());
                        return Some(value);
                    }
                }
            }
        };

        if expired {
            self.remove(key);
            self.metrics.record_miss(model);
        }
        None
    }

    /// Typed lookup.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, model: &str) -> Option<T> {
        self.get(key, model)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Insert a response under its fingerprint.
    ///
    /// `ttl_override` carries the per-model TTL when configured;
    /// `priority` feeds the priority-aware policies.
    pub fn insert(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_override: Option<Duration>,
        priority: u8,
    ) {
        let size_bytes = size::estimate_size(&value);
        self.make_room(size_bytes, priority);

        let now = Instant::now();
        let base_ttl = ttl_override.unwrap_or(self.default_ttl);
        // Access-sensitive policies compute expiry dynamically; only the
        // deterministic ones pin an absolute deadline.
        let expires_at = match self.ttl_policy {
            TtlPolicy::Fixed | TtlPolicy::TimeBased { .. } => now.checked_add(
                self.ttl_policy
                    .effective_ttl(base_ttl, 0, Self::hour_now()),
            ),
            TtlPolicy::Sliding { .. } | TtlPolicy::Adaptive { .. } => None,
        };
        let metadata = EntryMetadata {
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            size_bytes,
            priority,
            base_ttl,
            expires_at,
        };

        if let Some(previous) = self.entries.insert(
            key.to_string(),
            CacheEntry { value, metadata },
        ) {
            self.total_bytes
                .fetch_sub(previous.metadata.size_bytes, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size_bytes, Ordering::Relaxed);
    }

    /// Serialize-and-insert convenience for typed responses.
    pub fn insert_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_override: Option<Duration>,
    ) {
        if let Ok(serialized) = serde_json::to_value(value) {
            self.insert(key, serialized, ttl_override, 0);
        }
    }

    fn make_room(&self, incoming_bytes: u64, incoming_priority: u8) {
        let space_needed = {
            let mut state = match self.dynamic_state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            let DynamicState {
                last_recalc,
                effective_max_bytes,
            } = &mut *state;
            self.size_policy.space_needed(
                self.entries.len(),
                self.total_bytes.load(Ordering::Relaxed),
                incoming_bytes,
                incoming_priority,
                |band| {
                    self.entries
                        .iter()
                        .filter(|e| band.contains(e.metadata.priority))
                        .count()
                },
                last_recalc,
                effective_max_bytes,
            )
        };

        if space_needed == 0 {
            return;
        }

        let views: Vec<EntryView> = self
            .entries
            .iter()
            .map(|entry| EntryView {
                key: entry.key().clone(),
                age: entry.metadata.created_at.elapsed(),
                idle: entry.metadata.last_accessed_at.elapsed(),
                access_count: entry.metadata.access_count,
                size_bytes: entry.metadata.size_bytes,
                priority: entry.metadata.priority,
            })
            .collect();

        for victim in self.eviction_policy.select_victims(&views, space_needed) {
            tracing::trace!(key = %victim, "evicting cache entry");
            self.remove(&victim);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.total_bytes
                .fetch_sub(entry.metadata.size_bytes, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Import persisted aggregate stats; see [`CacheMetrics::import`].
    pub fn import_metrics(&self, persisted: &CacheMetricsSnapshot) -> bool {
        self.metrics.import(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::chat_fingerprint;
    use crate::models::{ChatRequest, Message};

    fn cache() -> ResponseCache {
        ResponseCache::with_defaults(Duration::from_secs(60), 100)
    }

    fn value(text: &str) -> serde_json::Value {
        serde_json::json!({"text": text})
    }

    #[test]
    fn miss_then_hit_with_metrics() {
        let cache = cache();
        let key = "chat:abc";

        assert!(cache.get(key, "gpt-4o").is_none());
        cache.insert(key, value("cached"), None, 0);
        assert_eq!(cache.get(key, "gpt-4o"), Some(value("cached")));

        let snapshot = cache.metrics();
        assert_eq!(snapshot.total_misses(), 1);
        assert_eq!(snapshot.total_hits(), 1);
        assert!((snapshot.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn expired_entries_read_as_misses_and_are_removed() {
        let cache = ResponseCache::with_defaults(Duration::from_millis(10), 100);
        cache.insert("k", value("v"), None, 0);
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get("k", "gpt-4o").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.metrics().total_misses(), 1);
    }

    #[test]
    fn per_entry_ttl_override_wins() {
        let cache = ResponseCache::with_defaults(Duration::from_millis(10), 100);
        cache.insert("long", value("v"), Some(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("long", "gpt-4o").is_some());
    }

    #[test]
    fn item_count_bound_evicts_lru() {
        let cache = ResponseCache::new(
            Duration::from_secs(60),
            TtlPolicy::Fixed,
            EvictionPolicy::Lru,
            SizePolicy::ItemCount { max_items: 2 },
        )
        .unwrap();

        cache.insert("a", value("a"), None, 0);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("b", value("b"), None, 0);
        // Touch "a" so "b" becomes the LRU victim.
        assert!(cache.get("a", "m").is_some());

        cache.insert("c", value("c"), None, 0);
        assert!(cache.len() <= 2);
        assert!(cache.get("b", "m").is_none());
        assert!(cache.get("c", "m").is_some());
    }

    #[test]
    fn byte_accounting_tracks_inserts_and_removals() {
        let cache = cache();
        cache.insert("a", value("0123456789"), None, 0);
        let after_insert = cache.size_bytes();
        assert!(after_insert > 0);

        // Replacing the entry swaps the accounted bytes.
        cache.insert("a", value("x"), None, 0);
        assert!(cache.size_bytes() < after_insert);

        cache.remove("a");
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn typed_round_trip_via_fingerprint() {
        let cache = cache();
        let request = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hello")],
            ..Default::default()
        };
        let key = chat_fingerprint(&request);

        let response = crate::models::ChatResponse {
            id: "chatcmpl-1".into(),
            object: "chat.completion".into(),
            created: 1,
            model: "gpt-4o".into(),
            choices: vec![],
            usage: None,
            system_fingerprint: None,
        };
        cache.insert_value(&key, &response, None);

        let cached: crate::models::ChatResponse = cache.get_as(&key, "gpt-4o").unwrap();
        assert_eq!(cached.id, "chatcmpl-1");
    }

    #[test]
    fn sliding_ttl_refreshes_on_access() {
        let cache = ResponseCache::new(
            Duration::from_millis(50),
            TtlPolicy::Sliding { max_lifetime: None },
            EvictionPolicy::Lru,
            SizePolicy::ItemCount { max_items: 10 },
        )
        .unwrap();

        cache.insert("k", value("v"), None, 0);
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(20));
            assert!(cache.get("k", "m").is_some(), "access should refresh TTL");
        }
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get("k", "m").is_none());
    }
}
