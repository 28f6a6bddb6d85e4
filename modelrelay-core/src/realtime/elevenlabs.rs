//! ElevenLabs conversational realtime translator.
//!
//! The conversational AI socket is simpler than OpenAI's: audio chunks
//! travel as base64 `user_audio_chunk` / `audio` events, text rides
//! `user_message`, and agent output arrives as discrete events rather
//! than typed delta streams. No subprotocol is required; auth rides the
//! `xi-api-key` header.

use super::translator::{RealtimeTranslator, ValidationReport};
use super::{ClientFrame, ErrorSeverity, RealtimeConfig, ServerFrame};
use crate::error::ProviderError;
use base64::Engine as _;
use serde_json::json;

const SUPPORTED_FORMATS: &[&str] = &["pcm_16000", "pcm_22050", "pcm_44100", "ulaw_8000"];

pub struct ElevenLabsRealtimeTranslator {
    api_key: String,
    base_ws_url: String,
}

impl ElevenLabsRealtimeTranslator {
    pub fn new(api_key: String, base_ws_url: String) -> Self {
        Self {
            api_key,
            base_ws_url,
        }
    }
}

impl RealtimeTranslator for ElevenLabsRealtimeTranslator {
    fn provider(&self) -> &str {
        "elevenlabs"
    }

    fn validate(&self, config: &RealtimeConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        if config.model.is_empty() {
            report = report.error("agent id (model) is required");
        }
        for format in [&config.input_audio_format, &config.output_audio_format]
            .into_iter()
            .flatten()
        {
            if !SUPPORTED_FORMATS.contains(&format.as_str()) {
                report = report.error(format!("unsupported audio format: {format}"));
            }
        }
        if config.temperature.is_some() {
            report = report.warning("temperature is controlled by the agent configuration");
        }
        report
    }

    fn connect_url(&self, config: &RealtimeConfig) -> String {
        format!("{}?agent_id={}", self.base_ws_url, config.model)
    }

    fn headers(&self, _config: &RealtimeConfig) -> Vec<(String, String)> {
        vec![("xi-api-key".to_string(), self.api_key.clone())]
    }

    fn init_messages(&self, config: &RealtimeConfig) -> Vec<String> {
        let mut overrides = serde_json::Map::new();
        if let Some(instructions) = &config.instructions {
            overrides.insert("prompt".into(), json!({"prompt": instructions}));
        }
        if let Some(voice) = &config.voice {
            overrides.insert("tts".into(), json!({"voice_id": voice}));
        }
        vec![json!({
            "type": "conversation_initiation_client_data",
            "conversation_config_override": {"agent": overrides},
        })
        .to_string()]
    }

    fn encode(&self, frame: &ClientFrame) -> Result<String, ProviderError> {
        let message = match frame {
            ClientFrame::AudioAppend { audio } => json!({
                "user_audio_chunk": base64::engine::general_purpose::STANDARD.encode(audio),
            }),
            ClientFrame::TextInput { text } => json!({
                "type": "user_message",
                "text": text,
            }),
            ClientFrame::FunctionResponse { call_id, output } => json!({
                "type": "client_tool_result",
                "tool_call_id": call_id,
                "result": output,
                "is_error": false,
            }),
            ClientFrame::ResponseRequest { .. } => {
                // The agent decides when to respond; there is no
                // explicit response trigger on this protocol.
                return Err(ProviderError::Unsupported {
                    feature: "explicit response requests".to_string(),
                });
            }
            ClientFrame::SessionUpdate { patch } => json!({
                "type": "conversation_initiation_client_data",
                "conversation_config_override": patch,
            }),
        };
        Ok(message.to_string())
    }

    fn decode(&self, raw: &str) -> Result<Option<ServerFrame>, ProviderError> {
        let event: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ProviderError::Protocol {
                message: format!("malformed conversational event: {e}"),
            })?;
        let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");

        let frame = match event_type {
            "audio" => {
                let chunk = event
                    .pointer("/audio_event/audio_base_64")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let audio = base64::engine::general_purpose::STANDARD
                    .decode(chunk)
                    .map_err(|e| ProviderError::Protocol {
                        message: format!("invalid base64 audio event: {e}"),
                    })?;
                Some(ServerFrame::AudioDelta {
                    audio,
                    is_final: false,
                })
            }
            "agent_response" => Some(ServerFrame::TextDelta {
                text: event
                    .pointer("/agent_response_event/agent_response")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            }),
            "client_tool_call" => {
                let call = event.get("client_tool_call").cloned().unwrap_or_default();
                Some(ServerFrame::FunctionCallDelta {
                    call_id: call
                        .get("tool_call_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: call
                        .get("tool_name")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    arguments_delta: call
                        .get("parameters")
                        .map(|p| p.to_string())
                        .unwrap_or_default(),
                    is_final: true,
                })
            }
            "interruption" | "vad_score" | "conversation_initiation_metadata" => {
                Some(ServerFrame::Status {
                    kind: event_type.to_string(),
                    detail: None,
                })
            }
            "error" => Some(ServerFrame::Error {
                code: "conversation_error".to_string(),
                message: event
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                severity: ErrorSeverity::Error,
                terminal: false,
            }),
            // Pings and transcription bookkeeping.
            _ => None,
        };
        Ok(frame)
    }
}
