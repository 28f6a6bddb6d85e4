//! OpenAI provider adapter.
//!
//! The canonical request/response shapes are OpenAI-derived, so this
//! adapter is mostly a passthrough with model mapping, usage synthesis,
//! and the realtime attach. It covers the widest capability surface of
//! any provider: chat, streaming, embeddings, images, TTS, STT, model
//! listing, auth verification, and realtime sessions.

use crate::error::ProviderError;
use crate::models::{
    AudioRequest, AudioResponse, Capability, CapabilityMask, ChatRequest, ChatResponse,
    EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse, SpeechRequest,
    SpeechResponse, StreamChunk, Usage,
};
use crate::providers::{
    AuthVerification, Provider, ProviderConfig, ProviderKind, StreamResult,
};
use crate::realtime::openai::OpenAiRealtimeTranslator;
use crate::realtime::{RealtimeConfig, RealtimeSession};
use async_stream::stream;
use serde::Deserialize;
use std::sync::Arc;

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

pub struct OpenAiProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = config.headers.clone();
        headers.insert("User-Agent".to_string(), config.user_agent.clone());
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE_URL,
            &headers,
            AuthStrategy::Bearer {
                token: config.credential.api_key.clone(),
            },
        )?;
        Ok(Self { http, config })
    }

    fn ensure_usage(response: &mut ChatResponse, request: &ChatRequest) {
        if response.usage.is_some() {
            return;
        }
        let prompt: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let completion: String = response
            .choices
            .iter()
            .map(|c| c.message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        response.usage = Some(Usage::estimated_from_text(&prompt, &completion));
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::chat()
            .with(Capability::Vision)
            .with(Capability::JsonMode)
            .with(Capability::Embeddings)
            .with(Capability::ImageGeneration)
            .with(Capability::TextToSpeech)
            .with(Capability::Transcription)
            .with(Capability::Realtime)
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        request.model = self.config.map_model(&request.model);
        request.stream = Some(false);
        let mut response: ChatResponse =
            self.http.post_json("/chat/completions", &request).await?;
        Self::ensure_usage(&mut response, &request);
        Ok(response)
    }

    async fn stream_chat(&self, mut request: ChatRequest) -> Result<StreamResult, ProviderError> {
        request.model = self.config.map_model(&request.model);
        request.stream = Some(true);

        let response = self.http.post_json_raw("/chat/completions", &request).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = futures::StreamExt::next(&mut bytes_stream).await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            if let Some(json_str) = line.strip_prefix("data: ") {
                                if json_str == "[DONE]" {
                                    return;
                                }
                                match serde_json::from_str::<StreamChunk>(json_str) {
                                    Ok(stream_chunk) => yield Ok(stream_chunk),
                                    Err(e) => yield Err(ProviderError::Protocol {
                                        message: format!("malformed stream chunk: {e}"),
                                    }),
                                }
                            }
                        }
                    }
                    Err(e) => yield Err(ProviderError::Http(e)),
                }
            }
        });

        Ok(stream)
    }

    async fn embedding(
        &self,
        mut request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        request.model = self.config.map_model(&request.model);
        self.http.post_json("/embeddings", &request).await
    }

    async fn image_generation(
        &self,
        mut request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        if let Some(model) = request.model.take() {
            request.model = Some(self.config.map_model(&model));
        }
        let mut response: ImageResponse =
            self.http.post_json("/images/generations", &request).await?;
        if response.usage.is_none() {
            response.usage = Some(Usage {
                image_count: Some(response.data.len() as u32),
                image_quality: request.quality.clone(),
                image_resolution: request.size.clone(),
                ..Default::default()
            });
        }
        Ok(response)
    }

    async fn text_to_speech(
        &self,
        mut request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        request.model = self.config.map_model(&request.model);
        let character_count = request.input.len() as u64;

        let response = self.http.post_json_raw("/audio/speech", &request).await?;
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
            .text("model", model);

        if let Some(language) = request.language {
            form = form.text("language", language);
        }
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }
        if let Some(format) = request.response_format {
            form = form.text("response_format", format);
        }

        let response = self.http.post_multipart("/audio/transcriptions", form).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let mut transcript: AudioResponse =
            super::http_client::decode_json(response).await?;
        if transcript.usage.is_none() {
            transcript.usage = Some(Usage {
                audio_seconds: transcript.duration.map(f64::from),
                ..Default::default()
            });
        }
        Ok(transcript)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let list: ModelList = self.http.get_json("/models").await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        match self.http.get_json::<serde_json::Value>("/models").await {
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
        let translator = Arc::new(OpenAiRealtimeTranslator::new(
            self.config.credential.api_key.clone(),
            self.config
                .base_url
                .as_deref()
                .map(http_to_ws)
                .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
        ));
        RealtimeSession::connect(translator, config).await
    }
}

/// Derive a realtime WebSocket endpoint from an HTTP base override.
fn http_to_ws(base: &str) -> String {
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{}/realtime", ws_base.trim_end_matches('/'))
}
