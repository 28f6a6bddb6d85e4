//! OpenAI realtime translator.
//!
//! Speaks the `realtime-v1` event protocol: audio travels base64-coded
//! inside JSON text frames, the handshake requires the
//! `openai-beta.realtime-v1` subprotocol plus the `OpenAI-Beta:
//! realtime=v1` header, and session configuration is pushed with a
//! `session.update` immediately after connect.

use super::translator::{RealtimeTranslator, ValidationReport};
use super::{ClientFrame, ErrorSeverity, RealtimeConfig, ServerFrame};
use crate::error::ProviderError;
use base64::Engine as _;
use serde_json::json;

pub const SUBPROTOCOL: &str = "openai-beta.realtime-v1";

const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4o-realtime-preview",
    "gpt-4o-realtime-preview-2024-12-17",
    "gpt-4o-mini-realtime-preview",
];
const SUPPORTED_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "sage", "shimmer", "verse",
];
const SUPPORTED_FORMATS: &[&str] = &["pcm16", "g711_ulaw", "g711_alaw"];

pub struct OpenAiRealtimeTranslator {
    api_key: String,
    base_ws_url: String,
}

impl OpenAiRealtimeTranslator {
    pub fn new(api_key: String, base_ws_url: String) -> Self {
        Self {
            api_key,
            base_ws_url,
        }
    }
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn b64_decode(text: &str) -> Result<Vec<u8>, ProviderError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| ProviderError::Protocol {
            message: format!("invalid base64 audio delta: {e}"),
        })
}

impl RealtimeTranslator for OpenAiRealtimeTranslator {
    fn provider(&self) -> &str {
        "openai"
    }

    fn validate(&self, config: &RealtimeConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        if !SUPPORTED_MODELS.contains(&config.model.as_str()) {
            report = report.error(format!("model {} is not realtime-capable", config.model));
        }
        if let Some(voice) = &config.voice {
            if !SUPPORTED_VOICES.contains(&voice.as_str()) {
                report = report.error(format!("unknown voice: {voice}"));
            }
        }
        for format in [&config.input_audio_format, &config.output_audio_format]
            .into_iter()
            .flatten()
        {
            if !SUPPORTED_FORMATS.contains(&format.as_str()) {
                report = report.error(format!("unsupported audio format: {format}"));
            }
        }
        if matches!(config.temperature, Some(t) if !(0.6..=1.2).contains(&t)) {
            report = report.warning("temperature outside the recommended 0.6..=1.2 band");
        }
        report
    }

    fn connect_url(&self, config: &RealtimeConfig) -> String {
        format!("{}?model={}", self.base_ws_url, config.model)
    }

    fn subprotocol(&self) -> Option<&str> {
        Some(SUBPROTOCOL)
    }

    fn headers(&self, _config: &RealtimeConfig) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", self.api_key)),
            ("OpenAI-Beta".to_string(), "realtime=v1".to_string()),
        ]
    }

    fn init_messages(&self, config: &RealtimeConfig) -> Vec<String> {
        let mut session = serde_json::Map::new();
        if let Some(voice) = &config.voice {
            session.insert("voice".into(), json!(voice));
        }
        if let Some(format) = &config.input_audio_format {
            session.insert("input_audio_format".into(), json!(format));
        }
        if let Some(format) = &config.output_audio_format {
            session.insert("output_audio_format".into(), json!(format));
        }
        if let Some(instructions) = &config.instructions {
            session.insert("instructions".into(), json!(instructions));
        }
        if let Some(temperature) = config.temperature {
            session.insert("temperature".into(), json!(temperature));
        }

        vec![json!({"type": "session.update", "session": session}).to_string()]
    }

    fn encode(&self, frame: &ClientFrame) -> Result<String, ProviderError> {
        let message = match frame {
            ClientFrame::AudioAppend { audio } => json!({
                "type": "input_audio_buffer.append",
                "audio": b64(audio),
            }),
            ClientFrame::TextInput { text } => json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": text}],
                },
            }),
            ClientFrame::FunctionResponse { call_id, output } => json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output,
                },
            }),
            ClientFrame::ResponseRequest {
                instructions,
                temperature,
            } => {
                let mut response = serde_json::Map::new();
                if let Some(instructions) = instructions {
                    response.insert("instructions".into(), json!(instructions));
                }
                if let Some(temperature) = temperature {
                    response.insert("temperature".into(), json!(temperature));
                }
                json!({"type": "response.create", "response": response})
            }
            ClientFrame::SessionUpdate { patch } => json!({
                "type": "session.update",
                "session": patch,
            }),
        };
        Ok(message.to_string())
    }

    fn decode(&self, raw: &str) -> Result<Option<ServerFrame>, ProviderError> {
        let event: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ProviderError::Protocol {
                message: format!("malformed realtime event: {e}"),
            })?;
        let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let text_of = |key: &str| {
            event
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let frame = match event_type {
            "response.audio.delta" => Some(ServerFrame::AudioDelta {
                audio: b64_decode(&text_of("delta"))?,
                is_final: false,
            }),
            "response.audio.done" => Some(ServerFrame::AudioDelta {
                audio: Vec::new(),
                is_final: true,
            }),
            "response.text.delta" | "response.audio_transcript.delta" => {
                Some(ServerFrame::TextDelta {
                    text: text_of("delta"),
                })
            }
            "response.function_call_arguments.delta" => Some(ServerFrame::FunctionCallDelta {
                call_id: text_of("call_id"),
                name: event
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string),
                arguments_delta: text_of("delta"),
                is_final: false,
            }),
            "response.function_call_arguments.done" => Some(ServerFrame::FunctionCallDelta {
                call_id: text_of("call_id"),
                name: event
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string),
                arguments_delta: text_of("arguments"),
                is_final: true,
            }),
            "error" => {
                let error = event.get("error").cloned().unwrap_or_default();
                let get = |key: &str| {
                    error
                        .get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Some(ServerFrame::Error {
                    code: get("code"),
                    message: get("message"),
                    severity: ErrorSeverity::Error,
                    terminal: get("type") == "invalid_request_error"
                        && get("code") == "session_expired",
                })
            }
            "session.created" | "session.updated" | "response.created" | "response.done"
            | "input_audio_buffer.speech_started" | "input_audio_buffer.speech_stopped"
            | "input_audio_buffer.committed" => Some(ServerFrame::Status {
                kind: event_type.to_string(),
                detail: None,
            }),
            // Conversation bookkeeping the canonical vocabulary skips.
            _ => None,
        };
        Ok(frame)
    }
}
