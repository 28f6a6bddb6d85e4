//! Cache eviction policies.
//!
//! Each policy scores entries so that the lowest score is the best
//! eviction candidate, then victims are taken in score order until the
//! reclaimed bytes meet the space bound. The returned set is minimal in
//! the greedy sense: no selected victim could be dropped without
//! falling below the bound.

use std::time::Duration;

/// Snapshot of one entry, as seen by the eviction policies.
#[derive(Debug, Clone)]
pub struct EntryView {
    pub key: String,
    /// Time since creation
    pub age: Duration,
    /// Time since last access
    pub idle: Duration,
    pub access_count: u64,
    pub size_bytes: u64,
    pub priority: u8,
}

/// Eviction discipline.
#[derive(Debug, Clone)]
pub enum EvictionPolicy {
    /// Least recently used first
    Lru,
    /// Least frequently used first; with a window, accesses only count
    /// while the entry stayed warm inside it
    Lfu { window: Option<Duration> },
    /// Lower priority evicted first, optionally age-weighted so stale
    /// high-priority entries eventually yield
    Priority { age_weighted: bool },
    /// Weighted blend of sub-policy scores
    Composite { components: Vec<(EvictionPolicy, f64)> },
}

impl EvictionPolicy {
    /// Score an entry; lower means evict sooner. Scores are normalized
    /// to comparable magnitudes so composites blend sensibly.
    fn score(&self, entry: &EntryView) -> f64 {
        match self {
            // Recently used entries score high.
            EvictionPolicy::Lru => -(entry.idle.as_secs_f64()),
            EvictionPolicy::Lfu { window } => {
                let counted = match window {
                    Some(window) if entry.idle > *window => 0,
                    _ => entry.access_count,
                };
                counted as f64
            }
            EvictionPolicy::Priority { age_weighted } => {
                let base = entry.priority as f64 * 1000.0;
                if *age_weighted {
                    base - entry.age.as_secs_f64()
                } else {
                    base
                }
            }
            EvictionPolicy::Composite { components } => components
                .iter()
                .map(|(policy, weight)| policy.score(entry) * weight)
                .sum(),
        }
    }

    /// Choose the minimal victim set whose combined size reaches
    /// `space_needed` bytes. Entries come back in eviction order.
    pub fn select_victims(&self, entries: &[EntryView], space_needed: u64) -> Vec<String> {
        if space_needed == 0 || entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&EntryView, f64)> =
            entries.iter().map(|e| (e, self.score(e))).collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut victims = Vec::new();
        let mut reclaimed = 0u64;
        for (entry, _) in scored {
            if reclaimed >= space_needed {
                break;
            }
            reclaimed += entry.size_bytes;
            victims.push(entry.key.clone());
        }
        victims
    }
}
