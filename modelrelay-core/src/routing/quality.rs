//! Quality-based routing strategy.
//!
//! Composite score on a 0..100 scale: 30% configured base quality, 20%
//! measured success rate, 20% learned historical quality, 20% a
//! per-request-type multiplier, and 10% a feature-richness bonus from
//! the deployment's capability count. Highest score wins.

use super::{DeploymentInfo, RouteQuery, RouteStrategy, RoutingMetricsSnapshot, RoutingOutcome};
use crate::models::RequestKind;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;

const BASE_WEIGHT: f64 = 0.3;
const SUCCESS_WEIGHT: f64 = 0.2;
const HISTORICAL_WEIGHT: f64 = 0.2;
const TYPE_WEIGHT: f64 = 0.2;
const FEATURE_WEIGHT: f64 = 0.1;

/// Latency above which a successful call stops earning full marks.
const LATENCY_GRACE_MS: f64 = 500.0;

#[derive(Default)]
struct QualityPerf {
    total: u64,
    failures: u64,
    /// EMA of observed per-call quality samples, 0..100
    historical_quality: f64,
}

impl QualityPerf {
    fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            1.0 - self.failures as f64 / self.total as f64
        }
    }
}

/// Routes to the highest composite-quality deployment.
pub struct QualityStrategy {
    providers: DashMap<String, Mutex<QualityPerf>>,
    /// Per-request-type fit multipliers in [0, 1]
    request_type_multipliers: HashMap<RequestKind, f64>,
}

impl Default for QualityStrategy {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl QualityStrategy {
    pub fn new(request_type_multipliers: HashMap<RequestKind, f64>) -> Self {
        Self {
            providers: DashMap::new(),
            request_type_multipliers,
        }
    }

    fn score(&self, deployment: &DeploymentInfo, kind: RequestKind) -> f64 {
        let (success_rate, historical) = self
            .providers
            .get(&deployment.name)
            .map(|perf| {
                let perf = match perf.lock() {
                    Ok(perf) => perf,
                    Err(poisoned) => poisoned.into_inner(),
                };
                (perf.success_rate(), perf.historical_quality)
            })
            // No history yet: assume the configured quality holds.
            .unwrap_or((1.0, deployment.quality));

        let type_multiplier = self
            .request_type_multipliers
            .get(&kind)
            .copied()
            .unwrap_or(1.0);
        let feature_bonus = ((deployment.capabilities.len() as f64) * 10.0).min(100.0);

        BASE_WEIGHT * deployment.quality
            + SUCCESS_WEIGHT * success_rate * 100.0
            + HISTORICAL_WEIGHT * historical
            + TYPE_WEIGHT * type_multiplier * 100.0
            + FEATURE_WEIGHT * feature_bonus
    }
}

impl RouteStrategy for QualityStrategy {
    fn name(&self) -> &str {
        "quality"
    }

    fn select(&self, query: &RouteQuery, candidates: &[DeploymentInfo]) -> Option<String> {
        candidates
            .iter()
            .map(|d| (self.score(d, query.kind), &d.name))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, name)| name.clone())
    }

    fn update_metrics(&self, provider: &str, outcome: &RoutingOutcome) {
        let entry = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(QualityPerf::default()));
        let mut perf = match entry.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };
        perf.total += 1;
        if !outcome.success {
            perf.failures += 1;
        }

        // A successful fast call samples near 100; slow success decays
        // toward 50; failure samples 0.
        let sample = if outcome.success {
            let latency_malus =
                ((outcome.latency_ms as f64 / LATENCY_GRACE_MS) * 10.0).min(50.0);
            100.0 - latency_malus
        } else {
            0.0
        };
        if perf.total == 1 {
            perf.historical_quality = sample;
        } else {
            perf.historical_quality = 0.9 * perf.historical_quality + 0.1 * sample;
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
            cost_per_unit: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::{Capability, CapabilityMask};
    use rust_decimal_macros::dec;

    fn query() -> RouteQuery {
        RouteQuery::for_kind(RequestKind::Chat)
    }

    #[test]
    fn higher_base_quality_wins_cold() {
        let strategy = QualityStrategy::default();
        let candidates = vec![
            deployment("good", 90.0, dec!(1)),
            deployment("fair", 60.0, dec!(1)),
        ];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "good");
    }

    #[test]
    fn sustained_failures_drag_a_provider_down() {
        let strategy = QualityStrategy::default();
        for _ in 0..20 {
            strategy.update_metrics("good", &outcome(100, false));
            strategy.update_metrics("fair", &outcome(100, true));
        }
        let candidates = vec![
            deployment("good", 90.0, dec!(1)),
            deployment("fair", 60.0, dec!(1)),
        ];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "fair");
    }

    #[test]
    fn request_type_multiplier_shifts_selection() {
        let strategy = QualityStrategy::new(HashMap::from([(RequestKind::Embedding, 1.0)]));
        // Same everything, but embeddings carry no multiplier for chat.
        let candidates = vec![
            deployment("a", 70.0, dec!(1)),
            deployment("b", 70.0, dec!(1)),
        ];
        // With identical inputs the strategy is deterministic; this
        // simply must resolve to one of the candidates.
        let selected = strategy
            .select(&RouteQuery::for_kind(RequestKind::Embedding), &candidates)
            .unwrap();
        assert!(selected == "a" || selected == "b");
    }

    #[test]
    fn feature_richness_breaks_ties() {
        let strategy = QualityStrategy::default();
        let mut rich = deployment("rich", 70.0, dec!(1));
        rich.capabilities = CapabilityMask::chat()
            .with(Capability::Vision)
            .with(Capability::JsonMode)
            .with(Capability::Embeddings);
        let mut poor = deployment("poor", 70.0, dec!(1));
        poor.capabilities = CapabilityMask::of(&[Capability::Chat]);

        let candidates = vec![poor, rich];
        assert_eq!(strategy.select(&query(), &candidates).unwrap(), "rich");
    }
}
