//! Request and usage validation.
//!
//! Everything here runs before dispatch or before costing; failures are
//! terminal for the operation and are never retried. Request validation
//! enforces the canonical-request invariants (model present, at least
//! one input, well-formed tool schemas); [`UsageValidator`] enforces the
//! arithmetic invariants the cost engine depends on.

use crate::error::ProviderError;
use crate::models::{
    AudioRequest, ChatRequest, EmbeddingRequest, ImageRequest, SpeechRequest, Usage, VideoRequest,
};
use std::collections::HashMap;

/// Maximum accepted function name length.
const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Inference steps must stay inside this closed range.
const INFERENCE_STEP_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

/// Extension parameter names that imply a non-negative count.
const NON_NEGATIVE_PARAM_HINTS: &[&str] = &["token", "step", "width", "height", "seed", "count"];

/// Accepts iff the name is 1..=64 chars of `[A-Za-z0-9_-]`.
pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn invalid(message: impl Into<String>) -> ProviderError {
    ProviderError::InvalidRequest {
        message: message.into(),
    }
}

/// Validate a chat request before dispatch.
///
/// Checks model presence, non-empty messages, tool schema shape, and
/// the JSON validity of any assistant function-call arguments.
pub fn validate_chat_request(request: &ChatRequest) -> Result<(), ProviderError> {
    if request.model.trim().is_empty() {
        return Err(invalid("model is required"));
    }
    if request.messages.is_empty() {
        return Err(invalid("messages must not be empty"));
    }

    if let Some(tools) = &request.tools {
        for tool in tools {
            if tool.tool_type != "function" {
                return Err(invalid(format!(
                    "unsupported tool type: {}",
                    tool.tool_type
                )));
            }
            if !is_valid_function_name(&tool.function.name) {
                return Err(invalid(format!(
                    "invalid function name: {}",
                    tool.function.name
                )));
            }
            if !tool.function.parameters.is_object() && !tool.function.parameters.is_null() {
                return Err(invalid(format!(
                    "function {} parameters must be a JSON object",
                    tool.function.name
                )));
            }
        }
    }

    for message in &request.messages {
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                if !is_valid_function_name(&call.function.name) {
                    return Err(invalid(format!(
                        "invalid function name in tool call: {}",
                        call.function.name
                    )));
                }
                if serde_json::from_str::<serde_json::Value>(&call.function.arguments).is_err() {
                    return Err(invalid(format!(
                        "function call {} carries invalid JSON arguments",
                        call.id
                    )));
                }
            }
        }
    }

    Ok(())
}

pub fn validate_embedding_request(request: &EmbeddingRequest) -> Result<(), ProviderError> {
    if request.model.trim().is_empty() {
        return Err(invalid("model is required"));
    }
    if request.input.is_empty() {
        return Err(invalid("input must not be empty"));
    }
    Ok(())
}

pub fn validate_image_request(request: &ImageRequest) -> Result<(), ProviderError> {
    if request.prompt.trim().is_empty() {
        return Err(invalid("prompt is required"));
    }
    if request.n == Some(0) {
        return Err(invalid("n must be positive"));
    }
    Ok(())
}

pub fn validate_video_request(request: &VideoRequest) -> Result<(), ProviderError> {
    if request.prompt.trim().is_empty() {
        return Err(invalid("prompt is required"));
    }
    if matches!(request.duration_seconds, Some(d) if d <= 0.0) {
        return Err(invalid("duration_seconds must be positive"));
    }
    Ok(())
}

pub fn validate_speech_request(request: &SpeechRequest) -> Result<(), ProviderError> {
    if request.input.is_empty() {
        return Err(invalid("input is required"));
    }
    if request.voice.is_empty() {
        return Err(invalid("voice is required"));
    }
    Ok(())
}

pub fn validate_audio_request(request: &AudioRequest) -> Result<(), ProviderError> {
    if request.file.is_empty() {
        return Err(invalid("audio file is required"));
    }
    if request.model.trim().is_empty() {
        return Err(invalid("model is required"));
    }
    Ok(())
}

/// Sanitize an opaque extension-parameter map in place.
///
/// Null values are stripped; parameters whose names imply a non-negative
/// count (tokens, steps, width, height, seed, count) are rejected when
/// negative.
pub fn sanitize_extensions(
    extensions: &mut HashMap<String, serde_json::Value>,
) -> Result<(), ProviderError> {
    extensions.retain(|_, value| !value.is_null());

    for (name, value) in extensions.iter() {
        let lowered = name.to_ascii_lowercase();
        if NON_NEGATIVE_PARAM_HINTS.iter().any(|h| lowered.contains(h)) {
            let negative = value
                .as_f64()
                .map(|v| v < 0.0)
                .or_else(|| value.as_i64().map(|v| v < 0))
                .unwrap_or(false);
            if negative {
                return Err(invalid(format!("parameter {name} must not be negative")));
            }
        }
    }
    Ok(())
}

/// Validates [`Usage`] records before they reach the cost engine.
pub struct UsageValidator;

impl UsageValidator {
    /// Collect every invariant violation in `usage`.
    pub fn check(usage: &Usage) -> Vec<String> {
        let mut messages = Vec::new();

        if let (Some(prompt), Some(completion), Some(total)) = (
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens,
        ) {
            if prompt + completion != total {
                messages.push(format!(
                    "total tokens ({total}) must equal prompt ({prompt}) plus completion ({completion})"
                ));
            }
        }

        let cached = usage.cached_input_tokens.unwrap_or(0) + usage.cached_write_tokens.unwrap_or(0);
        if let Some(prompt) = usage.prompt_tokens {
            if cached > prompt {
                messages.push(format!(
                    "cached tokens ({cached}) cannot exceed prompt tokens ({prompt})"
                ));
            }
        } else if cached > 0 {
            messages.push("cached tokens require prompt tokens to be present".to_string());
        }

        if let Some(steps) = usage.inference_steps {
            if !INFERENCE_STEP_RANGE.contains(&steps) {
                messages.push(format!("inference steps ({steps}) must be within 1..=1000"));
            }
        }
        if usage.image_count == Some(0) {
            messages.push("image count must be positive when present".to_string());
        }
        if matches!(usage.video_duration_seconds, Some(d) if d <= 0.0) {
            messages.push("video duration must be positive when present".to_string());
        }
        if matches!(usage.audio_seconds, Some(s) if s < 0.0) {
            messages.push("audio seconds must not be negative".to_string());
        }
        if usage.search_units == Some(0) {
            messages.push("search units must be positive when present".to_string());
        }
        if let Some(meta) = &usage.search_metadata {
            if meta.chunked_documents > meta.documents {
                messages.push(format!(
                    "chunked documents ({}) cannot exceed documents ({})",
                    meta.chunked_documents, meta.documents
                ));
            }
        }

        messages
    }

    /// Validate or fail with the full violation list.
    pub fn validate(usage: &Usage) -> Result<(), ProviderError> {
        let messages = Self::check(usage);
        if messages.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Validation { messages })
        }
    }
}
