//! Model pricing data.
//!
//! [`ModelCostInfo`] is the immutable per-model record the cost engine
//! consumes; the [`PricingModel`] tag selects which arithmetic applies
//! and carries the payload that arithmetic needs, so a variant can
//! never be paired with the wrong configuration shape.
//!
//! Rates are per-million for tokens and per-thousand for search units
//! and characters, expressed as decimals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One context tier of a tiered-token model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTier {
    /// Largest prompt+completion total this tier covers
    pub max_context_tokens: u64,
    /// Input rate per million tokens
    pub input_per_million: Decimal,
    /// Output rate per million tokens
    pub output_per_million: Decimal,
}

/// Which arithmetic the cost engine applies, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingModel {
    /// Per-token rates with cached-token and embedding branches
    Standard,
    /// Flat rate per clip, keyed `"{resolution}_{seconds}"`
    PerVideo { rates: HashMap<String, Decimal> },
    /// Per-second video with optional resolution multipliers
    PerSecondVideo {
        rate_per_second: Decimal,
        #[serde(default)]
        resolution_multipliers: HashMap<String, Decimal>,
    },
    /// Per diffusion step, with a default step count
    InferenceSteps {
        cost_per_step: Decimal,
        default_steps: u32,
    },
    /// Token rates selected by context tier
    TieredTokens { tiers: Vec<TokenTier> },
    /// Per generated image with quality/resolution multipliers
    PerImage {
        rate_per_image: Decimal,
        #[serde(default)]
        quality_multipliers: HashMap<String, Decimal>,
        #[serde(default)]
        resolution_multipliers: HashMap<String, Decimal>,
    },
    /// Audio billed by the minute; standard-path audio handling
    PerMinuteAudio,
    /// Text-to-speech billed per thousand characters; standard path
    PerThousandCharacters,
}

impl Default for PricingModel {
    fn default() -> Self {
        PricingModel::Standard
    }
}

/// Per-model pricing record, resolved from the model cost store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCostInfo {
    pub pricing_model: PricingModel,
    /// Input rate per million tokens
    pub input_per_million: Decimal,
    /// Output rate per million tokens
    pub output_per_million: Decimal,
    /// Embedding rate per million tokens
    pub embedding_per_million: Option<Decimal>,
    /// Cached-read rate per million tokens
    pub cached_input_per_million: Option<Decimal>,
    /// Cached-write rate per million tokens
    pub cached_write_per_million: Option<Decimal>,
    /// Cost per generated image
    pub image_per_image: Option<Decimal>,
    pub image_quality_multipliers: HashMap<String, Decimal>,
    pub image_resolution_multipliers: HashMap<String, Decimal>,
    /// Cost per second of generated video
    pub video_per_second: Option<Decimal>,
    pub video_resolution_multipliers: HashMap<String, Decimal>,
    /// Cost per thousand search units
    pub search_unit_per_thousand: Option<Decimal>,
    /// Cost per inference step
    pub cost_per_inference_step: Option<Decimal>,
    /// Audio rate per minute
    pub audio_per_minute: Option<Decimal>,
    /// Character rate per thousand characters
    pub per_thousand_characters: Option<Decimal>,
    /// Whether the model offers a batch endpoint
    pub supports_batch: bool,
    /// Multiplier applied to batched calls (e.g. 0.5)
    pub batch_multiplier: Option<Decimal>,
}

impl ModelCostInfo {
    /// Standard token pricing with the given per-million rates.
    pub fn tokens(input_per_million: Decimal, output_per_million: Decimal) -> Self {
        Self {
            pricing_model: PricingModel::Standard,
            input_per_million,
            output_per_million,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pricing_model_serde_is_tagged() {
        let model = PricingModel::PerSecondVideo {
            rate_per_second: dec!(0.05),
            resolution_multipliers: HashMap::from([("4k".to_string(), dec!(2))]),
        };
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["type"], "per_second_video");

        let back: PricingModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn cost_info_defaults_to_standard() {
        let info = ModelCostInfo::tokens(dec!(3), dec!(15));
        assert_eq!(info.pricing_model, PricingModel::Standard);
        assert_eq!(info.input_per_million, dec!(3));
        assert!(!info.supports_batch);
    }
}
