//! # Routing Module
//!
//! Selects a provider deployment for each request. The [`Router`] owns
//! a pool of [`DeploymentInfo`] records and a [`RouteStrategy`];
//! candidates are pre-filtered by capability and availability, the
//! strategy picks the single best deployment or none, and every
//! dispatch outcome flows back through `update_metrics` so strategies
//! learn from live traffic.
//!
//! Provided strategies: latency-based ([`latency`]), cost-based
//! ([`cost`]), quality-based ([`quality`]), and language-optimized
//! ([`language`]).

pub mod cost;
pub mod language;
pub mod latency;
pub mod quality;

use crate::models::{CapabilityMask, RequestKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// A routable deployment and its static characteristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    /// Deployment name (provider id or alias)
    pub name: String,
    pub capabilities: CapabilityMask,
    /// Base cost per usage unit, for cost-aware strategies
    pub cost_per_unit: Decimal,
    /// Configured quality score in [0, 100]
    pub quality: f64,
    /// Whether the deployment is currently dispatchable
    pub available: bool,
}

/// What the router needs to know about a request to route it.
#[derive(Debug, Clone)]
pub struct RouteQuery {
    pub kind: RequestKind,
    /// Capabilities beyond the kind's own requirement
    pub required: CapabilityMask,
    /// Detected request language, for language-aware strategies
    pub language: Option<String>,
}

impl RouteQuery {
    pub fn for_kind(kind: RequestKind) -> Self {
        Self {
            kind,
            required: CapabilityMask::empty(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Result of one dispatched call, fed back to the strategy.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub latency_ms: u64,
    pub success: bool,
    /// Usage magnitude (tokens, images, seconds) for load accounting
    pub usage_units: u64,
    pub language: Option<String>,
    pub cost: Option<Decimal>,
}

/// Point-in-time view of a provider's routing metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetricsSnapshot {
    pub average_latency_ms: f64,
    /// Success rate in [0, 1]
    pub success_rate: f64,
    /// Current load in [0, 1]
    pub load: f64,
    pub cost_per_unit: f64,
}

/// Strategy contract: pick one deployment from pre-filtered candidates
/// and learn from every dispatch.
pub trait RouteStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// The single best deployment for this query, or none.
    fn select(&self, query: &RouteQuery, candidates: &[DeploymentInfo]) -> Option<String>;

    /// A dispatch is starting; used for load accounting.
    fn on_dispatch(&self, _provider: &str) {}

    /// A dispatch finished, successfully or not.
    fn update_metrics(&self, provider: &str, outcome: &RoutingOutcome);

    /// Live metrics for a provider, when the strategy tracks them.
    fn metrics_snapshot(&self, _provider: &str) -> Option<RoutingMetricsSnapshot> {
        None
    }
}

/// Router over a deployment pool and a strategy.
pub struct Router {
    strategy: std::sync::Arc<dyn RouteStrategy>,
    deployments: RwLock<Vec<DeploymentInfo>>,
}

impl Router {
    pub fn new(strategy: std::sync::Arc<dyn RouteStrategy>) -> Self {
        Self {
            strategy,
            deployments: RwLock::new(Vec::new()),
        }
    }

    pub fn add_deployment(&self, deployment: DeploymentInfo) {
        if let Ok(mut deployments) = self.deployments.write() {
            deployments.retain(|d| d.name != deployment.name);
            deployments.push(deployment);
        }
    }

    pub fn set_available(&self, name: &str, available: bool) {
        if let Ok(mut deployments) = self.deployments.write() {
            if let Some(deployment) = deployments.iter_mut().find(|d| d.name == name) {
                deployment.available = available;
            }
        }
    }

    /// Select a deployment for `query`, marking the dispatch started.
    pub fn select(&self, query: &RouteQuery) -> Option<DeploymentInfo> {
        let candidates: Vec<DeploymentInfo> = {
            let deployments = self.deployments.read().ok()?;
            deployments
                .iter()
                .filter(|d| {
                    d.available
                        && d.capabilities.contains(query.kind.required_capability())
                        && d.capabilities.covers(&query.required)
                })
                .cloned()
                .collect()
        };

        if candidates.is_empty() {
            tracing::debug!(kind = ?query.kind, "no eligible deployments for request");
            return None;
        }

        let selected = self.strategy.select(query, &candidates)?;
        let deployment = candidates.into_iter().find(|d| d.name == selected)?;
        self.strategy.on_dispatch(&deployment.name);
        Some(deployment)
    }

    /// Report a dispatch outcome back to the strategy.
    pub fn record_outcome(&self, provider: &str, outcome: &RoutingOutcome) {
        self.strategy.update_metrics(provider, outcome);
    }

    pub fn metrics_snapshot(&self, provider: &str) -> Option<RoutingMetricsSnapshot> {
        self.strategy.metrics_snapshot(provider)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::{Capability, CapabilityMask};

    pub fn deployment(name: &str, quality: f64, cost: Decimal) -> DeploymentInfo {
        DeploymentInfo {
            name: name.to_string(),
            capabilities: CapabilityMask::chat().with(Capability::Embeddings),
            cost_per_unit: cost,
            quality,
            available: true,
        }
    }

    pub fn outcome(latency_ms: u64, success: bool) -> RoutingOutcome {
        RoutingOutcome {
            latency_ms,
            success,
            usage_units: 100,
            language: None,
            cost: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::Capability;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct FirstStrategy;

    impl RouteStrategy for FirstStrategy {
        fn name(&self) -> &str {
            "first"
        }
        fn select(&self, _query: &RouteQuery, candidates: &[DeploymentInfo]) -> Option<String> {
            candidates.first().map(|d| d.name.clone())
        }
        fn update_metrics(&self, _provider: &str, _outcome: &RoutingOutcome) {}
    }

    #[test]
    fn router_filters_by_capability_and_availability() {
        let router = Router::new(Arc::new(FirstStrategy));
        router.add_deployment(deployment("chat-only", 80.0, dec!(1)));

        let mut tts = deployment("tts", 80.0, dec!(1));
        tts.capabilities = CapabilityMask::of(&[Capability::TextToSpeech]);
        router.add_deployment(tts);

        let selected = router
            .select(&RouteQuery::for_kind(RequestKind::Chat))
            .unwrap();
        assert_eq!(selected.name, "chat-only");

        let selected = router
            .select(&RouteQuery::for_kind(RequestKind::TextToSpeech))
            .unwrap();
        assert_eq!(selected.name, "tts");

        router.set_available("tts", false);
        assert!(router
            .select(&RouteQuery::for_kind(RequestKind::TextToSpeech))
            .is_none());
    }

    #[test]
    fn router_returns_none_for_empty_pool() {
        let router = Router::new(Arc::new(FirstStrategy));
        assert!(router.select(&RouteQuery::for_kind(RequestKind::Chat)).is_none());
    }

    #[test]
    fn reregistering_a_deployment_replaces_it() {
        let router = Router::new(Arc::new(FirstStrategy));
        router.add_deployment(deployment("a", 50.0, dec!(1)));
        router.add_deployment(deployment("a", 90.0, dec!(2)));
        let selected = router
            .select(&RouteQuery::for_kind(RequestKind::Chat))
            .unwrap();
        assert_eq!(selected.quality, 90.0);
    }
}
