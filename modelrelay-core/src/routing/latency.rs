//! Latency-based routing strategy.
//!
//! Scores each candidate as a 30/70 blend of its rolling and historical
//! average latency, plus a load penalty of up to 100 points and a
//! failure-rate penalty of up to 200. Lowest score wins. The rolling
//! window is a bounded history queue refreshed on every dispatch.

use super::{DeploymentInfo, RouteQuery, RouteStrategy, RoutingMetricsSnapshot, RoutingOutcome};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

const HISTORY_CAPACITY: usize = 50;
const ROLLING_WEIGHT: f64 = 0.3;
const HISTORICAL_WEIGHT: f64 = 0.7;
const MAX_LOAD_PENALTY: f64 = 100.0;
const MAX_FAILURE_PENALTY: f64 = 200.0;
/// In-flight calls treated as full load.
const LOAD_SCALE: f64 = 10.0;

#[derive(Default)]
struct LatencyPerf {
    history: VecDeque<f64>,
    historical_avg: f64,
    total: u64,
    failures: u64,
}

impl LatencyPerf {
    fn rolling_avg(&self) -> f64 {
        if self.history.is_empty() {
            self.historical_avg
        } else {
            self.history.iter().sum::<f64>() / self.history.len() as f64
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

#[derive(Default)]
struct ProviderState {
    perf: Mutex<LatencyPerf>,
    in_flight: AtomicU32,
}

/// Routes to the deployment with the best blended latency outlook.
#[derive(Default)]
pub struct LatencyStrategy {
    providers: DashMap<String, ProviderState>,
}

impl LatencyStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, provider: &str) -> f64 {
        self.providers
            .get(provider)
            .map(|s| (s.in_flight.load(Ordering::Relaxed) as f64 / LOAD_SCALE).min(1.0))
            .unwrap_or(0.0)
    }

    fn score(&self, provider: &str) -> f64 {
        let Some(state) = self.providers.get(provider) else {
            // Unseen providers get a neutral score so they get traffic
            // and start building history.
            return 0.0;
        };
        let perf = match state.perf.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };

        let blended = ROLLING_WEIGHT * perf.rolling_avg() + HISTORICAL_WEIGHT * perf.historical_avg;
        let load_penalty = (self.load(provider) * MAX_LOAD_PENALTY).min(MAX_LOAD_PENALTY);
        let failure_penalty =
            (perf.failure_rate() * MAX_FAILURE_PENALTY).min(MAX_FAILURE_PENALTY);
        blended + load_penalty + failure_penalty
    }
}

impl RouteStrategy for LatencyStrategy {
    fn name(&self) -> &str {
        "latency"
    }

    fn select(&self, _query: &RouteQuery, candidates: &[DeploymentInfo]) -> Option<String> {
        candidates
            .iter()
            .map(|d| (self.score(&d.name), &d.name))
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, name)| name.clone())
    }

    fn on_dispatch(&self, provider: &str) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .in_flight
            .fetch_add(1, Ordering::Relaxed);
    }

    fn update_metrics(&self, provider: &str, outcome: &RoutingOutcome) {
        let state = self.providers.entry(provider.to_string()).or_default();
        let previous = state.in_flight.load(Ordering::Relaxed);
        if previous > 0 {
            state.in_flight.fetch_sub(1, Ordering::Relaxed);
        }

        let mut perf = match state.perf.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };
        perf.total += 1;
        if !outcome.success {
            perf.failures += 1;
        }

        let latency = outcome.latency_ms as f64;
        perf.history.push_back(latency);
        while perf.history.len() > HISTORY_CAPACITY {
            perf.history.pop_front();
        }
        if perf.historical_avg == 0.0 {
            perf.historical_avg = latency;
        } else {
            perf.historical_avg = 0.9 * perf.historical_avg + 0.1 * latency;
        }
    }

    fn metrics_snapshot(&self, provider: &str) -> Option<RoutingMetricsSnapshot> {
        let state = self.providers.get(provider)?;
        let perf = match state.perf.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(RoutingMetricsSnapshot {
            average_latency_ms: perf.rolling_avg(),
            success_rate: 1.0 - perf.failure_rate(),
            load: (state.in_flight.load(Ordering::Relaxed) as f64 / LOAD_SCALE).min(1.0),
            cost_per_unit: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn faster_provider_wins() {
        let strategy = LatencyStrategy::new();
        for _ in 0..10 {
            strategy.update_metrics("fast", &outcome(100, true));
            strategy.update_metrics("slow", &outcome(900, true));
        }

        let candidates = vec![
            deployment("slow", 80.0, dec!(1)),
            deployment("fast", 80.0, dec!(1)),
        ];
        let query = RouteQuery::for_kind(crate::models::RequestKind::Chat);
        assert_eq!(strategy.select(&query, &candidates).unwrap(), "fast");
    }

    #[test]
    fn failure_penalty_outweighs_modest_latency_edge() {
        let strategy = LatencyStrategy::new();
        for i in 0..10 {
            // Flaky provider is slightly faster but fails half the time.
            strategy.update_metrics("flaky", &outcome(100, i % 2 == 0));
            strategy.update_metrics("steady", &outcome(150, true));
        }

        let candidates = vec![
            deployment("flaky", 80.0, dec!(1)),
            deployment("steady", 80.0, dec!(1)),
        ];
        let query = RouteQuery::for_kind(crate::models::RequestKind::Chat);
        assert_eq!(strategy.select(&query, &candidates).unwrap(), "steady");
    }

    #[test]
    fn in_flight_load_penalizes_a_provider() {
        let strategy = LatencyStrategy::new();
        for _ in 0..10 {
            strategy.update_metrics("a", &outcome(100, true));
            strategy.update_metrics("b", &outcome(100, true));
        }
        for _ in 0..8 {
            strategy.on_dispatch("a");
        }

        let candidates = vec![deployment("a", 80.0, dec!(1)), deployment("b", 80.0, dec!(1))];
        let query = RouteQuery::for_kind(crate::models::RequestKind::Chat);
        assert_eq!(strategy.select(&query, &candidates).unwrap(), "b");
    }

    #[test]
    fn history_queue_is_bounded() {
        let strategy = LatencyStrategy::new();
        for _ in 0..(HISTORY_CAPACITY + 25) {
            strategy.update_metrics("a", &outcome(100, true));
        }
        let state = strategy.providers.get("a").unwrap();
        assert_eq!(state.perf.lock().unwrap().history.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn snapshot_reflects_updates() {
        let strategy = LatencyStrategy::new();
        strategy.update_metrics("a", &outcome(200, true));
        strategy.update_metrics("a", &outcome(400, false));

        let snapshot = strategy.metrics_snapshot("a").unwrap();
        assert_eq!(snapshot.average_latency_ms, 300.0);
        assert_eq!(snapshot.success_rate, 0.5);
    }
}
