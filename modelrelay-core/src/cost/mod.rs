//! # Cost Engine
//!
//! Stateless charge and refund calculation over [`Usage`] ×
//! [`ModelCostInfo`]. The pricing-model tag dispatches the arithmetic;
//! every intermediate value is a `rust_decimal::Decimal`, so charges
//! are exact at any scale the rates use.
//!
//! Charges decompose into a [`CostBreakdown`]; refunds run the same
//! math over a refund usage record validated field-by-field against
//! the original: an exceeded field clamps to the original, flags the
//! result partial, and contributes a validation message.

pub mod pricing;

use crate::error::ProviderError;
use crate::models::Usage;
use crate::validation::UsageValidator;
use pricing::{ModelCostInfo, PricingModel};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const MILLION: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const THOUSAND: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
const SIXTY: Decimal = Decimal::from_parts(60, 0, 0, false, 0);

/// Structured decomposition of a charge or refund.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: Decimal,
    pub output: Decimal,
    pub embedding: Decimal,
    pub image: Decimal,
    pub video: Decimal,
    pub search_unit: Decimal,
    pub inference_step: Decimal,
    pub audio: Decimal,
}

impl CostBreakdown {
    pub fn total(&self) -> Decimal {
        self.input
            + self.output
            + self.embedding
            + self.image
            + self.video
            + self.search_unit
            + self.inference_step
            + self.audio
    }

    fn scaled(self, factor: Decimal) -> Self {
        Self {
            input: self.input * factor,
            output: self.output * factor,
            embedding: self.embedding * factor,
            image: self.image * factor,
            video: self.video * factor,
            search_unit: self.search_unit * factor,
            inference_step: self.inference_step * factor,
            audio: self.audio * factor,
        }
    }
}

/// Result of a refund calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub total: Decimal,
    pub breakdown: CostBreakdown,
    /// True when any refund field exceeded its original and was clamped
    pub is_partial: bool,
    pub validation_messages: Vec<String>,
}

/// Stateless cost calculator; safe to share freely.
pub struct CostEngine;

fn dec_u64(value: u64) -> Decimal {
    Decimal::from(value)
}

fn dec_f64(value: f64, field: &str) -> Result<Decimal, ProviderError> {
    Decimal::from_f64(value).ok_or_else(|| ProviderError::Validation {
        messages: vec![format!("{field} is not a finite number: {value}")],
    })
}

fn multiplier(map: &std::collections::HashMap<String, Decimal>, key: Option<&str>) -> Decimal {
    key.and_then(|k| map.get(k).copied()).unwrap_or(Decimal::ONE)
}

impl CostEngine {
    /// Compute the charge for a validated usage record.
    pub fn calculate(usage: &Usage, info: &ModelCostInfo) -> Result<Decimal, ProviderError> {
        Ok(Self::charge_breakdown(usage, info)?.total())
    }

    /// Compute the charge with its full breakdown.
    pub fn charge_breakdown(
        usage: &Usage,
        info: &ModelCostInfo,
    ) -> Result<CostBreakdown, ProviderError> {
        UsageValidator::validate(usage)?;
        let mut breakdown = Self::raw_breakdown(usage, info)?;

        if usage.is_batch && info.supports_batch {
            if let Some(batch_multiplier) = info.batch_multiplier {
                breakdown = breakdown.scaled(batch_multiplier);
            }
        }
        Ok(breakdown)
    }

    fn raw_breakdown(
        usage: &Usage,
        info: &ModelCostInfo,
    ) -> Result<CostBreakdown, ProviderError> {
        let mut breakdown = CostBreakdown::default();

        match &info.pricing_model {
            PricingModel::Standard
            | PricingModel::PerMinuteAudio
            | PricingModel::PerThousandCharacters => {
                Self::standard_tokens(usage, info, &mut breakdown)?;
                Self::addenda(usage, info, &mut breakdown)?;
                Self::audio(usage, info, &mut breakdown)?;
            }
            PricingModel::PerVideo { rates } => {
                let resolution =
                    usage
                        .video_resolution
                        .as_deref()
                        .ok_or(ProviderError::Configuration {
                            message: "per-video pricing requires a video resolution".to_string(),
                        })?;
                let duration =
                    usage
                        .video_duration_seconds
                        .ok_or(ProviderError::Configuration {
                            message: "per-video pricing requires a video duration".to_string(),
                        })?;
                let key = format!("{resolution}_{}", duration.round() as i64);
                let rate = rates.get(&key).ok_or_else(|| ProviderError::Configuration {
                    message: format!("no per-video rate configured for {key}"),
                })?;
                breakdown.video = *rate;
            }
            PricingModel::PerSecondVideo {
                rate_per_second,
                resolution_multipliers,
            } => {
                let duration =
                    usage
                        .video_duration_seconds
                        .ok_or(ProviderError::Configuration {
                            message: "per-second video pricing requires a duration".to_string(),
                        })?;
                breakdown.video = dec_f64(duration, "video duration")?
                    * *rate_per_second
                    * multiplier(resolution_multipliers, usage.video_resolution.as_deref());
            }
            PricingModel::InferenceSteps {
                cost_per_step,
                default_steps,
            } => {
                let steps = usage.inference_steps.unwrap_or(*default_steps);
                breakdown.inference_step = dec_u64(steps as u64) * *cost_per_step;
            }
            PricingModel::TieredTokens { tiers } => {
                let prompt = usage.prompt_tokens.unwrap_or(0);
                let completion = usage.completion_tokens.unwrap_or(0);
                let total = prompt + completion;

                let tier = tiers
                    .iter()
                    .filter(|t| t.max_context_tokens >= total)
                    .min_by_key(|t| t.max_context_tokens)
                    .or_else(|| tiers.iter().max_by_key(|t| t.max_context_tokens))
                    .ok_or(ProviderError::Configuration {
                        message: "tiered pricing requires at least one tier".to_string(),
                    })?;

                breakdown.input = dec_u64(prompt) * tier.input_per_million / MILLION;
                breakdown.output = dec_u64(completion) * tier.output_per_million / MILLION;
            }
            PricingModel::PerImage {
                rate_per_image,
                quality_multipliers,
                resolution_multipliers,
            } => {
                let count = usage.image_count.ok_or(ProviderError::Configuration {
                    message: "per-image pricing requires an image count".to_string(),
                })?;
                breakdown.image = dec_u64(count as u64)
                    * *rate_per_image
                    * multiplier(quality_multipliers, usage.image_quality.as_deref())
                    * multiplier(resolution_multipliers, usage.image_resolution.as_deref());
            }
        }

        Ok(breakdown)
    }

    /// The standard per-token path with cached-read/write splits and
    /// the embedding branch.
    fn standard_tokens(
        usage: &Usage,
        info: &ModelCostInfo,
        breakdown: &mut CostBreakdown,
    ) -> Result<(), ProviderError> {
        let prompt = usage.prompt_tokens.unwrap_or(0);
        let completion = usage.completion_tokens.unwrap_or(0);
        let cached_read = usage.cached_input_tokens.unwrap_or(0);
        let cached_write = usage.cached_write_tokens.unwrap_or(0);

        // Embedding calls report no completion; when an embedding rate
        // exists it replaces the input rate entirely.
        if completion == 0 && prompt > 0 {
            if let Some(embedding_rate) = info.embedding_per_million {
                breakdown.embedding = dec_u64(prompt) * embedding_rate / MILLION;
                return Ok(());
            }
        }

        let uncached = prompt.saturating_sub(cached_read + cached_write);
        let cached_read_rate = info
            .cached_input_per_million
            .unwrap_or(info.input_per_million);
        let cached_write_rate = info
            .cached_write_per_million
            .unwrap_or(info.input_per_million);

        breakdown.input = (dec_u64(uncached) * info.input_per_million
            + dec_u64(cached_read) * cached_read_rate
            + dec_u64(cached_write) * cached_write_rate)
            / MILLION;
        breakdown.output = dec_u64(completion) * info.output_per_million / MILLION;
        Ok(())
    }

    /// Addenda applied on the standard path when the matching counts
    /// are present.
    fn addenda(
        usage: &Usage,
        info: &ModelCostInfo,
        breakdown: &mut CostBreakdown,
    ) -> Result<(), ProviderError> {
        if let (Some(count), Some(rate)) = (usage.image_count, info.image_per_image) {
            breakdown.image = dec_u64(count as u64)
                * rate
                * multiplier(&info.image_quality_multipliers, usage.image_quality.as_deref());
        }
        if let (Some(duration), Some(rate)) = (usage.video_duration_seconds, info.video_per_second)
        {
            breakdown.video = dec_f64(duration, "video duration")?
                * rate
                * multiplier(
                    &info.video_resolution_multipliers,
                    usage.video_resolution.as_deref(),
                );
        }
        if let (Some(units), Some(rate)) = (usage.search_units, info.search_unit_per_thousand) {
            breakdown.search_unit = dec_u64(units as u64) * (rate / THOUSAND);
        }
        if let (Some(steps), Some(rate)) = (usage.inference_steps, info.cost_per_inference_step) {
            breakdown.inference_step = dec_u64(steps as u64) * rate;
        }
        Ok(())
    }

    fn audio(
        usage: &Usage,
        info: &ModelCostInfo,
        breakdown: &mut CostBreakdown,
    ) -> Result<(), ProviderError> {
        if let (Some(seconds), Some(rate)) = (usage.audio_seconds, info.audio_per_minute) {
            breakdown.audio += dec_f64(seconds, "audio seconds")? / SIXTY * rate;
        }
        if let (Some(characters), Some(rate)) =
            (usage.audio_characters, info.per_thousand_characters)
        {
            breakdown.audio += dec_u64(characters) / THOUSAND * rate;
        }
        Ok(())
    }

    /// Compute a refund for `refund` against the originally charged
    /// `original`.
    ///
    /// Each refund field is bounded by its original; exceeding fields
    /// clamp, flag the refund partial, and produce a validation
    /// message. The refund total never exceeds the original charge.
    pub fn refund(
        original: &Usage,
        refund: &Usage,
        info: &ModelCostInfo,
    ) -> Result<RefundResult, ProviderError> {
        let mut messages = Vec::new();
        let clamped = Self::clamp_refund(original, refund, &mut messages);

        let breakdown = Self::charge_breakdown(&clamped, info)?;
        Ok(RefundResult {
            total: breakdown.total(),
            breakdown,
            is_partial: !messages.is_empty(),
            validation_messages: messages,
        })
    }

    fn clamp_refund(original: &Usage, refund: &Usage, messages: &mut Vec<String>) -> Usage {
        fn clamp_u64(
            field: &str,
            refund: Option<u64>,
            original: Option<u64>,
            messages: &mut Vec<String>,
        ) -> Option<u64> {
            match (refund, original) {
                (Some(r), Some(o)) if r > o => {
                    messages.push(format!(
                        "Refund {field} ({r}) cannot exceed original ({o})"
                    ));
                    Some(o)
                }
                (Some(r), None) => {
                    messages.push(format!(
                        "Refund {field} ({r}) cannot exceed original (0)"
                    ));
                    None
                }
                (refund, _) => refund,
            }
        }

        fn clamp_u32(
            field: &str,
            refund: Option<u32>,
            original: Option<u32>,
            messages: &mut Vec<String>,
        ) -> Option<u32> {
            clamp_u64(
                field,
                refund.map(u64::from),
                original.map(u64::from),
                messages,
            )
            .map(|v| v as u32)
        }

        fn clamp_f64(
            field: &str,
            refund: Option<f64>,
            original: Option<f64>,
            messages: &mut Vec<String>,
        ) -> Option<f64> {
            match (refund, original) {
                (Some(r), Some(o)) if r > o => {
                    messages.push(format!(
                        "Refund {field} ({r}) cannot exceed original ({o})"
                    ));
                    Some(o)
                }
                (Some(r), None) => {
                    messages.push(format!(
                        "Refund {field} ({r}) cannot exceed original (0)"
                    ));
                    None
                }
                (refund, _) => refund,
            }
        }

        let prompt = clamp_u64(
            "prompt tokens",
            refund.prompt_tokens,
            original.prompt_tokens,
            messages,
        );
        let completion = clamp_u64(
            "completion tokens",
            refund.completion_tokens,
            original.completion_tokens,
            messages,
        );
        let cached_read = clamp_u64(
            "cached input tokens",
            refund.cached_input_tokens,
            original.cached_input_tokens,
            messages,
        );
        let cached_write = clamp_u64(
            "cached write tokens",
            refund.cached_write_tokens,
            original.cached_write_tokens,
            messages,
        );

        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            // Derived, so the clamped record always validates.
            total_tokens: match (prompt, completion) {
                (Some(p), Some(c)) => Some(p + c),
                _ => None,
            },
            cached_input_tokens: cached_read,
            cached_write_tokens: cached_write,
            image_count: clamp_u32(
                "image count",
                refund.image_count,
                original.image_count,
                messages,
            ),
            image_quality: refund
                .image_quality
                .clone()
                .or_else(|| original.image_quality.clone()),
            image_resolution: refund
                .image_resolution
                .clone()
                .or_else(|| original.image_resolution.clone()),
            video_duration_seconds: clamp_f64(
                "video duration seconds",
                refund.video_duration_seconds,
                original.video_duration_seconds,
                messages,
            ),
            video_resolution: refund
                .video_resolution
                .clone()
                .or_else(|| original.video_resolution.clone()),
            inference_steps: clamp_u32(
                "inference steps",
                refund.inference_steps,
                original.inference_steps,
                messages,
            ),
            search_units: clamp_u32(
                "search units",
                refund.search_units,
                original.search_units,
                messages,
            ),
            search_metadata: refund.search_metadata.clone(),
            audio_seconds: clamp_f64(
                "audio seconds",
                refund.audio_seconds,
                original.audio_seconds,
                messages,
            ),
            audio_characters: clamp_u64(
                "audio characters",
                refund.audio_characters,
                original.audio_characters,
                messages,
            ),
            is_batch: original.is_batch,
            estimated: refund.estimated || original.estimated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricing::TokenTier;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn standard_charge_matches_per_million_rates() {
        let info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        let usage = Usage::for_tokens(1000, 500);
        let cost = CostEngine::calculate(&usage, &info).unwrap();
        assert_eq!(cost, dec!(0.0105));
    }

    #[test]
    fn cached_read_tokens_use_the_cached_rate() {
        let mut info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        info.cached_input_per_million = Some(dec!(0.30));
        let usage = Usage {
            prompt_tokens: Some(1000),
            cached_input_tokens: Some(400),
            completion_tokens: Some(500),
            ..Default::default()
        };

        let breakdown = CostEngine::charge_breakdown(&usage, &info).unwrap();
        // 600·3/1e6 + 400·0.30/1e6 for input, 500·15/1e6 for output.
        assert_eq!(breakdown.input, dec!(0.00192));
        assert_eq!(breakdown.output, dec!(0.0075));
        assert_eq!(breakdown.total(), dec!(0.00942));
    }

    #[test]
    fn cached_write_tokens_use_the_write_rate() {
        let mut info = ModelCostInfo::tokens(dec!(2.00), dec!(10.00));
        info.cached_input_per_million = Some(dec!(0.20));
        info.cached_write_per_million = Some(dec!(2.50));
        let usage = Usage {
            prompt_tokens: Some(1000),
            cached_input_tokens: Some(300),
            cached_write_tokens: Some(200),
            completion_tokens: Some(100),
            ..Default::default()
        };

        let breakdown = CostEngine::charge_breakdown(&usage, &info).unwrap();
        // 500·2 + 300·0.2 + 200·2.5 = 1560 per million.
        assert_eq!(breakdown.input, dec!(0.00156));
        assert_eq!(breakdown.output, dec!(0.001));
    }

    #[test]
    fn tiered_tokens_select_smallest_covering_tier() {
        let info = ModelCostInfo {
            pricing_model: PricingModel::TieredTokens {
                tiers: vec![
                    TokenTier {
                        max_context_tokens: 8000,
                        input_per_million: dec!(1),
                        output_per_million: dec!(2),
                    },
                    TokenTier {
                        max_context_tokens: 32000,
                        input_per_million: dec!(2),
                        output_per_million: dec!(4),
                    },
                ],
            },
            ..Default::default()
        };

        let usage = Usage::for_tokens(5000, 1000);
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(0.007));

        // Above every tier: the highest tier applies.
        let huge = Usage::for_tokens(40_000, 1000);
        assert_eq!(
            CostEngine::calculate(&huge, &info).unwrap(),
            dec!(0.080) + dec!(0.004)
        );
    }

    #[test]
    fn per_video_rate_table_and_hard_failure() {
        let info = ModelCostInfo {
            pricing_model: PricingModel::PerVideo {
                rates: HashMap::from([
                    ("720p_6".to_string(), dec!(0.40)),
                    ("1080p_6".to_string(), dec!(0.80)),
                ]),
            },
            ..Default::default()
        };

        let usage = Usage {
            video_resolution: Some("720p".into()),
            video_duration_seconds: Some(6.0),
            ..Default::default()
        };
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(0.40));

        let missing = Usage {
            video_resolution: Some("4k".into()),
            video_duration_seconds: Some(6.0),
            ..Default::default()
        };
        let err = CostEngine::calculate(&missing, &info).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn per_second_video_applies_resolution_multiplier() {
        let info = ModelCostInfo {
            pricing_model: PricingModel::PerSecondVideo {
                rate_per_second: dec!(0.05),
                resolution_multipliers: HashMap::from([("4k".to_string(), dec!(2))]),
            },
            ..Default::default()
        };
        let usage = Usage {
            video_duration_seconds: Some(10.0),
            video_resolution: Some("4k".into()),
            ..Default::default()
        };
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(1.00));
    }

    #[test]
    fn inference_steps_fall_back_to_default() {
        let info = ModelCostInfo {
            pricing_model: PricingModel::InferenceSteps {
                cost_per_step: dec!(0.001),
                default_steps: 30,
            },
            ..Default::default()
        };
        assert_eq!(
            CostEngine::calculate(&Usage::default(), &info).unwrap(),
            dec!(0.030)
        );
        let explicit = Usage {
            inference_steps: Some(50),
            ..Default::default()
        };
        assert_eq!(CostEngine::calculate(&explicit, &info).unwrap(), dec!(0.050));
    }

    #[test]
    fn per_image_multiplies_quality_and_resolution() {
        let info = ModelCostInfo {
            pricing_model: PricingModel::PerImage {
                rate_per_image: dec!(0.04),
                quality_multipliers: HashMap::from([("hd".to_string(), dec!(2))]),
                resolution_multipliers: HashMap::from([("1792x1024".to_string(), dec!(1.5))]),
            },
            ..Default::default()
        };
        let usage = Usage {
            image_count: Some(2),
            image_quality: Some("hd".into()),
            image_resolution: Some("1792x1024".into()),
            ..Default::default()
        };
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(0.24));
    }

    #[test]
    fn embedding_branch_replaces_input_rate() {
        let mut info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        info.embedding_per_million = Some(dec!(0.10));
        let usage = Usage {
            prompt_tokens: Some(2000),
            completion_tokens: Some(0),
            total_tokens: Some(2000),
            ..Default::default()
        };
        let breakdown = CostEngine::charge_breakdown(&usage, &info).unwrap();
        assert_eq!(breakdown.embedding, dec!(0.0002));
        assert_eq!(breakdown.input, Decimal::ZERO);
    }

    #[test]
    fn addenda_stack_on_the_standard_path() {
        let mut info = ModelCostInfo::tokens(dec!(1), dec!(1));
        info.search_unit_per_thousand = Some(dec!(5));
        info.cost_per_inference_step = Some(dec!(0.002));
        let usage = Usage {
            prompt_tokens: Some(1000),
            completion_tokens: Some(1000),
            total_tokens: Some(2000),
            search_units: Some(200),
            inference_steps: Some(10),
            ..Default::default()
        };
        let breakdown = CostEngine::charge_breakdown(&usage, &info).unwrap();
        assert_eq!(breakdown.search_unit, dec!(1.000));
        assert_eq!(breakdown.inference_step, dec!(0.020));
        assert_eq!(breakdown.input + breakdown.output, dec!(0.002));
    }

    #[test]
    fn audio_paths_bill_minutes_and_characters() {
        let mut info = ModelCostInfo {
            pricing_model: PricingModel::PerMinuteAudio,
            ..Default::default()
        };
        info.audio_per_minute = Some(dec!(0.36));
        let usage = Usage {
            audio_seconds: Some(90.0),
            ..Default::default()
        };
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(0.54));

        let mut info = ModelCostInfo {
            pricing_model: PricingModel::PerThousandCharacters,
            ..Default::default()
        };
        info.per_thousand_characters = Some(dec!(0.30));
        let usage = Usage {
            audio_characters: Some(5000),
            ..Default::default()
        };
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(1.50));
    }

    #[test]
    fn batch_discount_applies_only_when_supported() {
        let mut info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        info.supports_batch = true;
        info.batch_multiplier = Some(dec!(0.5));

        let mut usage = Usage::for_tokens(1000, 500);
        usage.is_batch = true;
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(0.00525));

        info.supports_batch = false;
        assert_eq!(CostEngine::calculate(&usage, &info).unwrap(), dec!(0.0105));
    }

    #[test]
    fn cost_is_never_negative() {
        // Cached tokens at the prompt bound with zero-rate extremes.
        let mut info = ModelCostInfo::tokens(dec!(0), dec!(0));
        info.cached_input_per_million = Some(dec!(0));
        let usage = Usage {
            prompt_tokens: Some(100),
            cached_input_tokens: Some(100),
            completion_tokens: Some(0),
            ..Default::default()
        };
        let cost = CostEngine::calculate(&usage, &info).unwrap();
        assert!(cost >= Decimal::ZERO);
    }

    #[test]
    fn refund_mirrors_charge() {
        let info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        let original = Usage::for_tokens(1000, 500);
        let refund = CostEngine::refund(&original, &original, &info).unwrap();

        assert_eq!(refund.total, dec!(0.0105));
        assert!(!refund.is_partial);
        assert!(refund.validation_messages.is_empty());
        assert_eq!(refund.breakdown.input, dec!(0.003));
        assert_eq!(refund.breakdown.output, dec!(0.0075));
    }

    #[test]
    fn exceeding_refund_is_clamped_and_flagged_partial() {
        let info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        let original = Usage::for_tokens(1000, 500);
        let refund_request = Usage::for_tokens(2000, 500);

        let refund = CostEngine::refund(&original, &refund_request, &info).unwrap();
        assert!(refund.is_partial);
        assert!(refund
            .validation_messages
            .contains(&"Refund prompt tokens (2000) cannot exceed original (1000)".to_string()));

        // Clamped to the original, so the totals match exactly.
        let original_charge = CostEngine::calculate(&original, &info).unwrap();
        assert_eq!(refund.total, original_charge);
    }

    #[test]
    fn refund_never_exceeds_original_charge() {
        let mut info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        info.image_per_image = Some(dec!(0.04));
        info.search_unit_per_thousand = Some(dec!(5));

        let original = Usage {
            prompt_tokens: Some(1000),
            completion_tokens: Some(500),
            total_tokens: Some(1500),
            image_count: Some(2),
            search_units: Some(100),
            ..Default::default()
        };
        let over = Usage {
            prompt_tokens: Some(5000),
            completion_tokens: Some(5000),
            total_tokens: Some(10_000),
            image_count: Some(10),
            search_units: Some(1000),
            ..Default::default()
        };

        let original_charge = CostEngine::calculate(&original, &info).unwrap();
        let refund = CostEngine::refund(&original, &over, &info).unwrap();
        assert!(refund.total <= original_charge);
        assert!(refund.is_partial);
        assert_eq!(refund.validation_messages.len(), 4);
    }

    #[test]
    fn partial_refund_of_a_subset_of_fields() {
        let info = ModelCostInfo::tokens(dec!(3.00), dec!(15.00));
        let original = Usage::for_tokens(1000, 500);
        let partial = Usage {
            prompt_tokens: Some(400),
            ..Default::default()
        };

        let refund = CostEngine::refund(&original, &partial, &info).unwrap();
        assert!(!refund.is_partial);
        assert_eq!(refund.total, dec!(0.0012));
        assert_eq!(refund.breakdown.output, Decimal::ZERO);
    }
}
