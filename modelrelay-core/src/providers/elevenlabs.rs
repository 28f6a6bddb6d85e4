//! ElevenLabs provider adapter.
//!
//! Audio-only surface: text-to-speech against the per-voice endpoint
//! and speech-to-text via multipart upload. Auth verification uses the
//! free `GET /v1/user` profile endpoint.

use crate::error::ProviderError;
use crate::models::{
    AudioRequest, AudioResponse, Capability, CapabilityMask, SpeechRequest, SpeechResponse, Usage,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind};
use crate::realtime::elevenlabs::ElevenLabsRealtimeTranslator;
use crate::realtime::{RealtimeConfig, RealtimeSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_REALTIME_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

pub struct ElevenLabsProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct TtsRequest {
    text: String,
    model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceSettings>,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    speed: f32,
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
    #[serde(default)]
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList(Vec<ModelEntry>);

#[derive(Debug, Deserialize)]
struct ModelEntry {
    model_id: String,
}

impl ElevenLabsProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = config.headers.clone();
        headers.insert("User-Agent".to_string(), config.user_agent.clone());
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE_URL,
            &headers,
            AuthStrategy::Header {
                name: "xi-api-key".to_string(),
                value: config.credential.api_key.clone(),
            },
        )?;
        Ok(Self { http, config })
    }
}

#[async_trait::async_trait]
impl Provider for ElevenLabsProvider {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::of(&[
            Capability::TextToSpeech,
            Capability::Transcription,
            Capability::Realtime,
        ])
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        let model = self.config.map_model(&request.model);
        let character_count = request.input.len() as u64;
        let path = format!("/v1/text-to-speech/{}", request.voice);

        let tts_request = TtsRequest {
            text: request.input,
            model_id: model,
            voice_settings: request.speed.map(|speed| VoiceSettings { speed }),
        };

        let response = self.http.post_json_raw(&path, &tts_request).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let audio = response.bytes().await?.to_vec();

        Ok(SpeechResponse {
            audio,
            content_type,
            usage: Some(Usage {
                audio_characters: Some(character_count),
                ..Default::default()
            }),
        })
    }

    async fn transcription(&self, request: AudioRequest) -> Result<AudioResponse, ProviderError> {
        let model = self.config.map_model(&request.model);

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(request.file)
                    .file_name("audio.mp3")
                    .mime_str("audio/mpeg")?,
            )
            .text("model_id", model);
        if let Some(language) = request.language {
            form = form.text("language_code", language);
        }

        let response = self.http.post_multipart("/v1/speech-to-text", form).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let stt: SttResponse = super::http_client::decode_json(response).await?;
        Ok(AudioResponse {
            text: stt.text,
            language: stt.language_code,
            duration: None,
            usage: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let list: ModelList = self.http.get_json("/v1/models").await?;
        Ok(list.0.into_iter().map(|m| m.model_id).collect())
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        match self.http.get_json::<serde_json::Value>("/v1/user").await {
            Ok(_) => Ok(AuthVerification::Ok),
            Err(e) if !e.is_retryable() => Ok(AuthVerification::failed(
                e.kind().machine_code(),
                Some(e.to_string()),
            )),
            Err(e) => Err(e),
        }
    }

    async fn realtime_connect(
        &self,
        config: RealtimeConfig,
    ) -> Result<RealtimeSession, ProviderError> {
        let translator = Arc::new(ElevenLabsRealtimeTranslator::new(
            self.config.credential.api_key.clone(),
            self.config
                .base_url
                .as_deref()
                .map(|base| {
                    let ws = if let Some(rest) = base.strip_prefix("https://") {
                        format!("wss://{rest}")
                    } else if let Some(rest) = base.strip_prefix("http://") {
                        format!("ws://{rest}")
                    } else {
                        base.to_string()
                    };
                    format!("{}/v1/convai/conversation", ws.trim_end_matches('/'))
                })
                .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
        ));
        RealtimeSession::connect(translator, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> ElevenLabsProvider {
        let config = test_support::config(ProviderKind::ElevenLabs).with_base_url(server.uri());
        ElevenLabsProvider::new(config).unwrap()
    }

    #[tokio::test]
    async fn tts_hits_voice_endpoint_and_counts_characters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/rachel"))
            .and(header("xi-api-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(vec![0u8, 1, 2, 3]),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .text_to_speech(SpeechRequest {
                model: "eleven_turbo_v2".into(),
                input: "Hello world".into(),
                voice: "rachel".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.audio, vec![0, 1, 2, 3]);
        assert_eq!(response.content_type, "audio/mpeg");
        assert_eq!(response.usage.unwrap().audio_characters, Some(11));
    }

    #[tokio::test]
    async fn auth_probe_uses_user_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/user"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        match provider.verify_auth().await.unwrap() {
            AuthVerification::Failed { reason, .. } => assert_eq!(reason, "access_forbidden"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_is_unsupported() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);
        let err = provider
            .chat(crate::models::ChatRequest {
                model: "eleven".into(),
                messages: vec![crate::models::Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }
}
