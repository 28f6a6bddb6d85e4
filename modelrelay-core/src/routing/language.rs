//! Language-optimized routing strategy.
//!
//! Blends a static provider/language-family affinity table with
//! per-language success rates learned by exponential moving average and
//! a recent-performance signal. Languages collapse to families (CJK,
//! Romance, Germanic, ...) so sparse traffic in one language still
//! benefits from its relatives.

use super::{DeploymentInfo, RouteQuery, RouteStrategy, RoutingOutcome};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;

const AFFINITY_WEIGHT: f64 = 0.5;
const LEARNED_WEIGHT: f64 = 0.3;
const RECENT_WEIGHT: f64 = 0.2;
const EMA_RETAIN: f64 = 0.8;

/// Collapse an ISO-ish language code to a coarse family.
pub fn language_family(language: &str) -> &'static str {
    let code = language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_ascii_lowercase();
    match code.as_str() {
        "zh" | "ja" | "ko" => "cjk",
        "en" | "de" | "nl" | "sv" | "no" | "da" => "germanic",
        "fr" | "es" | "it" | "pt" | "ro" => "romance",
        "ru" | "pl" | "uk" | "cs" | "sk" | "bg" => "slavic",
        "ar" | "he" => "semitic",
        "hi" | "bn" | "ur" => "indic",
        _ => "other",
    }
}

#[derive(Default)]
struct LanguagePerf {
    /// EMA success rate per language family
    learned: HashMap<String, f64>,
    /// EMA of overall recent success
    recent: f64,
    samples: u64,
}

/// Routes by provider/language fit.
pub struct LanguageStrategy {
    /// provider → family → affinity in [0, 1]
    affinity: HashMap<String, HashMap<String, f64>>,
    providers: DashMap<String, Mutex<LanguagePerf>>,
}

impl Default for LanguageStrategy {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl LanguageStrategy {
    pub fn new(affinity: HashMap<String, HashMap<String, f64>>) -> Self {
        Self {
            affinity,
            providers: DashMap::new(),
        }
    }

    /// Declare a provider's static affinity for a language family.
    pub fn with_affinity(
        mut self,
        provider: impl Into<String>,
        family: impl Into<String>,
        affinity: f64,
    ) -> Self {
        self.affinity
            .entry(provider.into())
            .or_default()
            .insert(family.into(), affinity.clamp(0.0, 1.0));
        self
    }

    fn score(&self, provider: &str, family: &str) -> f64 {
        let affinity = self
            .affinity
            .get(provider)
            .and_then(|families| families.get(family))
            .copied()
            .unwrap_or(0.5);

        let (learned, recent) = self
            .providers
            .get(provider)
            .map(|perf| {
                let perf = match perf.lock() {
                    Ok(perf) => perf,
                    Err(poisoned) => poisoned.into_inner(),
                };
                (
                    perf.learned.get(family).copied().unwrap_or(0.5),
                    if perf.samples == 0 { 0.5 } else { perf.recent },
                )
            })
            .unwrap_or((0.5, 0.5));

        AFFINITY_WEIGHT * affinity + LEARNED_WEIGHT * learned + RECENT_WEIGHT * recent
    }
}

impl RouteStrategy for LanguageStrategy {
    fn name(&self) -> &str {
        "language"
    }

    fn select(&self, query: &RouteQuery, candidates: &[DeploymentInfo]) -> Option<String> {
        let family = query
            .language
            .as_deref()
            .map(language_family)
            .unwrap_or("other");
        candidates
            .iter()
            .map(|d| (self.score(&d.name, family), &d.name))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, name)| name.clone())
    }

    fn update_metrics(&self, provider: &str, outcome: &RoutingOutcome) {
        let entry = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(LanguagePerf::default()));
        let mut perf = match entry.lock() {
            Ok(perf) => perf,
            Err(poisoned) => poisoned.into_inner(),
        };

        let sample = if outcome.success { 1.0 } else { 0.0 };
        if let Some(language) = &outcome.language {
            let family = language_family(language).to_string();
            let learned = perf.learned.entry(family).or_insert(0.5);
            *learned = EMA_RETAIN * *learned + (1.0 - EMA_RETAIN) * sample;
        }

        perf.recent = if perf.samples == 0 {
            sample
        } else {
            EMA_RETAIN * perf.recent + (1.0 - EMA_RETAIN) * sample
        };
        perf.samples += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::RequestKind;
    use rust_decimal_macros::dec;

    fn query_for(language: &str) -> RouteQuery {
        RouteQuery::for_kind(RequestKind::Chat).with_language(language)
    }

    #[test]
    fn family_mapping() {
        assert_eq!(language_family("zh"), "cjk");
        assert_eq!(language_family("zh-TW"), "cjk");
        assert_eq!(language_family("en_US"), "germanic");
        assert_eq!(language_family("pt"), "romance");
        assert_eq!(language_family("tlh"), "other");
    }

    #[test]
    fn affinity_table_drives_cold_selection() {
        let strategy = LanguageStrategy::default()
            .with_affinity("east", "cjk", 0.95)
            .with_affinity("west", "cjk", 0.3);
        let candidates = vec![
            deployment("west", 80.0, dec!(1)),
            deployment("east", 80.0, dec!(1)),
        ];
        assert_eq!(strategy.select(&query_for("ja"), &candidates).unwrap(), "east");
    }

    #[test]
    fn learned_success_overrides_neutral_affinity() {
        let strategy = LanguageStrategy::default();
        for _ in 0..20 {
            strategy.update_metrics(
                "a",
                &RoutingOutcome {
                    language: Some("fr".into()),
                    ..outcome(100, false)
                },
            );
            strategy.update_metrics(
                "b",
                &RoutingOutcome {
                    language: Some("fr".into()),
                    ..outcome(100, true)
                },
            );
        }
        let candidates = vec![deployment("a", 80.0, dec!(1)), deployment("b", 80.0, dec!(1))];
        assert_eq!(strategy.select(&query_for("es"), &candidates).unwrap(), "b");
    }

    #[test]
    fn missing_language_falls_back_to_other_family() {
        let strategy = LanguageStrategy::default().with_affinity("generalist", "other", 0.9);
        let candidates = vec![
            deployment("specialist", 80.0, dec!(1)),
            deployment("generalist", 80.0, dec!(1)),
        ];
        let query = RouteQuery::for_kind(RequestKind::Chat);
        assert_eq!(strategy.select(&query, &candidates).unwrap(), "generalist");
    }
}
