//! Cost-based routing strategy.
//!
//! Effective cost divides the base unit cost by the measured success
//! rate (retries against a flaky provider are money too), with the
//! penalty capped when the rate collapses to zero. The effective cost
//! is then quality-adjusted by `2 − quality/100`, so a 100-quality
//! deployment pays face value and a 0-quality one pays double. Lowest
//! adjusted cost wins among candidates above the quality floor.

use super::{DeploymentInfo, RouteQuery, RouteStrategy, RoutingMetricsSnapshot, RoutingOutcome};
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Mutex;

/// Floor applied to the measured success rate before division.
const MIN_SUCCESS_RATE: f64 = 0.01;

#[derive(Default)]
struct SuccessPerf {
    total: u64,
    failures: u64,
    total_cost: f64,
}

impl SuccessPerf {
    fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            1.0 - self.failures as f64 / self.total as f64
        }
    }
}

/// Routes to the cheapest quality-adjusted deployment.
pub struct CostStrategy {
    providers: DashMap<String, Mutex<SuccessPerf>>,
    min_quality: f64,
}

impl Default for CostStrategy {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl CostStrategy {
    pub fn new(min_quality: f64) -> Self {
        Self {
            providers: DashMap::new(),
            min_quality,
        }
    }

    fn success_rate(&self, provider: &str) -> f64 {
        self.providers
            .get(provider)
            .map(|perf| match perf.lock() {
                Ok(perf) => perf.success_rate(),
                Err(poisoned) => poisoned.into_inner().success_rate(),
            })
            .unwrap_or(1.0)
    }

    fn quality_adjusted_cost(&self, deployment: &DeploymentInfo) -> f64 {
        let base = deployment.cost_per_unit.to_f64().unwrap_or(f64::MAX);
        let effective = base / self.success_rate(&deployment.name).max(MIN_SUCCESS_RATE);
        effective * (2.0 - deployment.quality / 100.0)
    }
}

impl RouteStrategy for CostStrategy {
    fn name(&self) -> &str {
        "cost"
    }

    fn select(&self, _query: &RouteQuery, candidates: &[DeploymentInfo]) -> Option<String> {
        candidates
            .iter()
            .filter(|d| d.quality >= self.min_quality)
            .map(|d| (self.quality_adjusted_cost(d), &d.name))
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, name)| name.clone())
    }

    fn update_metrics(&self, provider: &str, outcome: &RoutingOutcome) {
        let entry = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(SuccessPerf::default()));
        let mut perf = match entry.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };
        perf.total += 1;
        if !outcome.success {
            perf.failures += 1;
        }
        if let Some(cost) = outcome.cost {
            perf.total_cost += cost.to_f64().unwrap_or(0.0);
        }
    }

    fn metrics_snapshot(&self, provider: &str) -> Option<RoutingMetricsSnapshot> {
        let entry = self.providers.get(provider)?;
        let perf = match entry.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(RoutingMetricsSnapshot {
            average_latency_ms: 0.0,
            success_rate: perf.success_rate(),
            load: 0.0,
            cost_per_unit: if perf.total == 0 {
                0.0
            } else {
                perf.total_cost / perf.total as f64
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use rust_decimal_macros::dec;

    fn query() -> RouteQuery {
        RouteQuery::for_kind(crate::models::RequestKind::Chat)
    }

    #[test]
    fn cheapest_wins_at_equal_quality() {
        let strategy = CostStrategy::new(0.0);
        let candidates = vec![
            deployment("pricey", 80.0, dec!(10)),
            deployment("cheap", 80.0, dec!(2)),
        ];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "cheap");
    }

    #[test]
    fn failures_inflate_effective_cost() {
        let strategy = CostStrategy::new(0.0);
        // "cheap" fails 80% of the time: effective cost 2/0.2 = 10 > 9.
        for i in 0..10 {
            strategy.update_metrics("cheap", &outcome(100, i >= 8));
        }
        let candidates = vec![
            deployment("pricey", 80.0, dec!(9)),
            deployment("cheap", 80.0, dec!(2)),
        ];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "pricey");
    }

    #[test]
    fn zero_success_rate_penalty_is_capped() {
        let strategy = CostStrategy::new(0.0);
        for _ in 0..5 {
            strategy.update_metrics("dead", &outcome(100, false));
        }
        // Capped at ×100, not infinite, so a dead-but-only candidate
        // still resolves.
        let candidates = vec![deployment("dead", 80.0, dec!(1))];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "dead");
    }

    #[test]
    fn quality_adjustment_prefers_better_deployments() {
        let strategy = CostStrategy::new(0.0);
        // Same base cost: 100-quality pays ×1.0, 50-quality ×1.5.
        let candidates = vec![
            deployment("mediocre", 50.0, dec!(4)),
            deployment("great", 100.0, dec!(4)),
        ];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "great");
    }

    #[test]
    fn quality_floor_filters_candidates() {
        let strategy = CostStrategy::new(70.0);
        let candidates = vec![
            deployment("cheap-bad", 40.0, dec!(1)),
            deployment("ok", 75.0, dec!(5)),
        ];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "ok");

        let only_bad = vec![deployment("cheap-bad", 40.0, dec!(1))];
        assert!(strategy.select(&query(), &only_bad).is_none());
    }
}
