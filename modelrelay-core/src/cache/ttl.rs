//! Cache TTL policies.
//!
//! Four expiry disciplines over the same entry metadata. `Fixed` ages
//! from creation; `Sliding` ages from last access with an optional hard
//! lifetime; `Adaptive` stretches the TTL for hot entries; `TimeBased`
//! picks the TTL from a rule table by wall-clock hour, first match by
//! descending priority.

use std::time::Duration;

/// A time-of-day TTL rule. `start_hour..end_hour` is a half-open range
/// in UTC; ranges may wrap midnight.
#[derive(Debug, Clone)]
pub struct TimeRule {
    pub priority: u8,
    pub start_hour: u8,
    pub end_hour: u8,
    pub ttl: Duration,
}

impl TimeRule {
    fn matches(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Expiry discipline for cache entries.
#[derive(Debug, Clone)]
pub enum TtlPolicy {
    /// Entries live exactly their base TTL from creation
    Fixed,
    /// Each access restarts the clock, bounded by an optional lifetime
    Sliding { max_lifetime: Option<Duration> },
    /// TTL grows by `growth_factor` per `access_threshold` accesses,
    /// capped at `max_ttl`
    Adaptive {
        growth_factor: f64,
        access_threshold: u64,
        max_ttl: Duration,
    },
    /// TTL selected from a rule table by hour of day
    TimeBased { rules: Vec<TimeRule> },
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy::Fixed
    }
}

impl TtlPolicy {
    /// The TTL an entry currently enjoys under this policy.
    pub fn effective_ttl(&self, base_ttl: Duration, access_count: u64, hour: u8) -> Duration {
        match self {
            TtlPolicy::Fixed | TtlPolicy::Sliding { .. } => base_ttl,
            TtlPolicy::Adaptive {
                growth_factor,
                access_threshold,
                max_ttl,
            } => {
                let threshold = (*access_threshold).max(1);
                let buckets = access_count / threshold;
                let grown = base_ttl.mul_f64(growth_factor.powi(buckets.min(32) as i32));
                grown.min(*max_ttl)
            }
            TtlPolicy::TimeBased { rules } => {
                let mut sorted: Vec<&TimeRule> = rules.iter().collect();
                sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
                sorted
                    .into_iter()
                    .find(|r| r.matches(hour))
                    .map(|r| r.ttl)
                    .unwrap_or(base_ttl)
            }
        }
    }

    /// Whether an entry has expired.
    ///
    /// `age` is time since creation, `idle` time since the last access.
    pub fn is_expired(
        &self,
        base_ttl: Duration,
        age: Duration,
        idle: Duration,
        access_count: u64,
        hour: u8,
    ) -> bool {
        match self {
            TtlPolicy::Fixed => age > base_ttl,
            TtlPolicy::Sliding { max_lifetime } => {
                if let Some(lifetime) = max_lifetime {
                    if age > *lifetime {
                        return true;
                    }
                }
                idle > base_ttl
            }
            TtlPolicy::Adaptive { .. } => age > self.effective_ttl(base_ttl, access_count, hour),
            TtlPolicy::TimeBased { .. } => age > self.effective_ttl(base_ttl, access_count, hour),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn fixed_ages_from_creation() {
        let policy = TtlPolicy::Fixed;
        assert!(!policy.is_expired(10 * MINUTE, 9 * MINUTE, Duration::ZERO, 100, 0));
        assert!(policy.is_expired(10 * MINUTE, 11 * MINUTE, Duration::ZERO, 100, 0));
    }

    #[test]
    fn sliding_ages_from_access_with_lifetime_bound() {
        let policy = TtlPolicy::Sliding {
            max_lifetime: Some(60 * MINUTE),
        };
        // Recently touched: alive even when old.
        assert!(!policy.is_expired(10 * MINUTE, 50 * MINUTE, MINUTE, 5, 0));
        // Idle past the TTL: expired.
        assert!(policy.is_expired(10 * MINUTE, 20 * MINUTE, 11 * MINUTE, 5, 0));
        // Past the hard lifetime: expired no matter how hot.
        assert!(policy.is_expired(10 * MINUTE, 61 * MINUTE, Duration::ZERO, 5, 0));
    }

    #[test]
    fn adaptive_grows_per_access_bucket_and_caps() {
        let policy = TtlPolicy::Adaptive {
            growth_factor: 2.0,
            access_threshold: 10,
            max_ttl: 40 * MINUTE,
        };
        assert_eq!(policy.effective_ttl(10 * MINUTE, 0, 0), 10 * MINUTE);
        assert_eq!(policy.effective_ttl(10 * MINUTE, 9, 0), 10 * MINUTE);
        assert_eq!(policy.effective_ttl(10 * MINUTE, 10, 0), 20 * MINUTE);
        assert_eq!(policy.effective_ttl(10 * MINUTE, 20, 0), 40 * MINUTE);
        // Capped.
        assert_eq!(policy.effective_ttl(10 * MINUTE, 90, 0), 40 * MINUTE);

        assert!(!policy.is_expired(10 * MINUTE, 15 * MINUTE, Duration::ZERO, 10, 0));
        assert!(policy.is_expired(10 * MINUTE, 15 * MINUTE, Duration::ZERO, 0, 0));
    }

    #[test]
    fn time_based_picks_highest_priority_match() {
        let policy = TtlPolicy::TimeBased {
            rules: vec![
                TimeRule {
                    priority: 1,
                    start_hour: 0,
                    end_hour: 24,
                    ttl: 5 * MINUTE,
                },
                TimeRule {
                    priority: 9,
                    start_hour: 9,
                    end_hour: 17,
                    ttl: MINUTE,
                },
            ],
        };
        // Business hours: the high-priority short TTL wins.
        assert_eq!(policy.effective_ttl(30 * MINUTE, 0, 12), MINUTE);
        // Overnight: fall through to the catch-all rule.
        assert_eq!(policy.effective_ttl(30 * MINUTE, 0, 3), 5 * MINUTE);
    }

    #[test]
    fn time_rules_wrap_midnight() {
        let rule = TimeRule {
            priority: 1,
            start_hour: 22,
            end_hour: 6,
            ttl: MINUTE,
        };
        assert!(rule.matches(23));
        assert!(rule.matches(2));
        assert!(!rule.matches(12));
    }
}
