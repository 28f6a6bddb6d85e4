//! Cache size policies.
//!
//! A size policy decides when insertion requires eviction and how many
//! bytes must be reclaimed. Sizing uses the JSON-serialized length of
//! the stored value, falling back to primitive size estimates when a
//! value cannot be serialized.

use serde_json::Value;
use std::time::{Duration, Instant};

/// Estimate the stored footprint of a value in bytes.
pub fn estimate_size(value: &Value) -> u64 {
    match serde_json::to_string(value) {
        Ok(serialized) => serialized.len() as u64,
        Err(_) => primitive_size(value),
    }
}

fn primitive_size(value: &Value) -> u64 {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 5,
        Value::Number(_) => 16,
        Value::String(s) => s.len() as u64 + 2,
        Value::Array(items) => items.iter().map(primitive_size).sum::<u64>() + 2,
        Value::Object(map) => {
            map.iter()
                .map(|(k, v)| k.len() as u64 + 3 + primitive_size(v))
                .sum::<u64>()
                + 2
        }
    }
}

/// One priority band of a tiered size policy. Bands are closed ranges
/// over entry priority and must not overlap.
#[derive(Debug, Clone)]
pub struct TierBand {
    pub min_priority: u8,
    pub max_priority: u8,
    pub max_items: usize,
}

impl TierBand {
    pub fn contains(&self, priority: u8) -> bool {
        (self.min_priority..=self.max_priority).contains(&priority)
    }

    fn overlaps(&self, other: &TierBand) -> bool {
        self.min_priority <= other.max_priority && other.min_priority <= self.max_priority
    }
}

/// Capacity discipline for the cache store.
#[derive(Debug, Clone)]
pub enum SizePolicy {
    /// Bound the number of entries
    ItemCount { max_items: usize },
    /// Bound total stored bytes
    MemoryBytes { max_bytes: u64 },
    /// Recalculate the byte bound periodically against a target share
    /// of a memory budget
    Dynamic {
        budget_bytes: u64,
        target_percent: f64,
        recalc_interval: Duration,
    },
    /// Bound items per priority band
    Tiered { bands: Vec<TierBand> },
}

impl SizePolicy {
    /// Reject invalid configurations; tiered bands must not overlap.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            SizePolicy::ItemCount { max_items } if *max_items == 0 => {
                Err("item-count policy requires a positive bound".to_string())
            }
            SizePolicy::Dynamic { target_percent, .. }
                if !(0.0..=100.0).contains(target_percent) =>
            {
                Err(format!("target percent out of range: {target_percent}"))
            }
            SizePolicy::Tiered { bands } => {
                for (i, a) in bands.iter().enumerate() {
                    if a.min_priority > a.max_priority {
                        return Err(format!(
                            "band {i} is inverted: {}..{}",
                            a.min_priority, a.max_priority
                        ));
                    }
                    for b in &bands[i + 1..] {
                        if a.overlaps(b) {
                            return Err(format!(
                                "tier bands overlap: {}..{} and {}..{}",
                                a.min_priority, a.max_priority, b.min_priority, b.max_priority
                            ));
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Bytes that must be reclaimed before inserting `incoming_bytes`.
    ///
    /// `band_count` reports current item counts per matching tier band
    /// for the incoming entry's priority.
    pub fn space_needed(
        &self,
        current_items: usize,
        current_bytes: u64,
        incoming_bytes: u64,
        incoming_priority: u8,
        band_count: impl Fn(&TierBand) -> usize,
        last_recalc: &mut Instant,
        effective_max_bytes: &mut u64,
    ) -> u64 {
        match self {
            SizePolicy::ItemCount { max_items } => {
                if current_items >= *max_items {
                    // One entry out, one in; bytes stand in for count.
                    incoming_bytes.max(1)
                } else {
                    0
                }
            }
            SizePolicy::MemoryBytes { max_bytes } => {
                (current_bytes + incoming_bytes).saturating_sub(*max_bytes)
            }
            SizePolicy::Dynamic {
                budget_bytes,
                target_percent,
                recalc_interval,
            } => {
                if last_recalc.elapsed() >= *recalc_interval || *effective_max_bytes == 0 {
                    *effective_max_bytes =
                        (*budget_bytes as f64 * (target_percent / 100.0)) as u64;
                    *last_recalc = Instant::now();
                }
                (current_bytes + incoming_bytes).saturating_sub(*effective_max_bytes)
            }
            SizePolicy::Tiered { bands } => {
                for band in bands {
                    if band.contains(incoming_priority) && band_count(band) >= band.max_items {
                        return incoming_bytes.max(1);
                    }
                }
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_estimate_uses_serialized_length() {
        let value = serde_json::json!({"text": "hello"});
        assert_eq!(estimate_size(&value), r#"{"text":"hello"}"#.len() as u64);
    }

    #[test]
    fn primitive_fallback_accounts_for_structure() {
        let value = serde_json::json!({"a": [1, 2], "b": "xy"});
        assert!(primitive_size(&value) > 0);
        assert!(primitive_size(&serde_json::json!(null)) == 4);
    }

    fn no_bands(_: &TierBand) -> usize {
        0
    }

    #[test]
    fn item_count_requires_eviction_at_capacity() {
        let policy = SizePolicy::ItemCount { max_items: 2 };
        let mut t = Instant::now();
        let mut eff = 0;
        assert_eq!(policy.space_needed(1, 0, 100, 0, no_bands, &mut t, &mut eff), 0);
        assert!(policy.space_needed(2, 0, 100, 0, no_bands, &mut t, &mut eff) > 0);
    }

    #[test]
    fn memory_bytes_reports_overflow() {
        let policy = SizePolicy::MemoryBytes { max_bytes: 1000 };
        let mut t = Instant::now();
        let mut eff = 0;
        assert_eq!(policy.space_needed(5, 800, 100, 0, no_bands, &mut t, &mut eff), 0);
        assert_eq!(
            policy.space_needed(5, 950, 100, 0, no_bands, &mut t, &mut eff),
            50
        );
    }

    #[test]
    fn dynamic_recalculates_against_target_percent() {
        let policy = SizePolicy::Dynamic {
            budget_bytes: 10_000,
            target_percent: 50.0,
            recalc_interval: Duration::from_secs(3600),
        };
        let mut t = Instant::now();
        let mut eff = 0;
        // First call computes the effective bound (5000).
        assert_eq!(
            policy.space_needed(0, 4000, 2000, 0, no_bands, &mut t, &mut eff),
            1000
        );
        assert_eq!(eff, 5000);
    }

    #[test]
    fn tiered_bands_enforce_per_band_counts() {
        let policy = SizePolicy::Tiered {
            bands: vec![
                TierBand {
                    min_priority: 0,
                    max_priority: 4,
                    max_items: 1,
                },
                TierBand {
                    min_priority: 5,
                    max_priority: 9,
                    max_items: 10,
                },
            ],
        };
        assert!(policy.validate().is_ok());

        let mut t = Instant::now();
        let mut eff = 0;
        let full_low_band = |band: &TierBand| if band.max_priority <= 4 { 1 } else { 0 };
        assert!(policy.space_needed(1, 0, 100, 2, full_low_band, &mut t, &mut eff) > 0);
        assert_eq!(
            policy.space_needed(1, 0, 100, 7, full_low_band, &mut t, &mut eff),
            0
        );
    }

    #[test]
    fn overlapping_bands_are_rejected() {
        let policy = SizePolicy::Tiered {
            bands: vec![
                TierBand {
                    min_priority: 0,
                    max_priority: 5,
                    max_items: 1,
                },
                TierBand {
                    min_priority: 5,
                    max_priority: 9,
                    max_items: 1,
                },
            ],
        };
        assert!(policy.validate().is_err());
    }
}
