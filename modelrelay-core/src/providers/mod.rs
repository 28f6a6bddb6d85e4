//! # Provider System Module
//!
//! The provider abstraction layer: one [`Provider`] trait implemented by
//! every upstream adapter, a [`ProviderConfig`] describing how to reach
//! an upstream, and a factory that turns a resolved deployment into a
//! live client.
//!
//! ## Supported providers
//!
//! - **OpenAI**: chat, streaming, embeddings, images, TTS, STT, realtime
//! - **Anthropic-compatible**: chat and streaming with tool use
//! - **Cohere**: chat and embeddings in Cohere-native shape
//! - **Groq**: OpenAI-compatible chat and streaming
//! - **OpenRouter**: OpenAI-compatible aggregation with referral headers
//! - **ElevenLabs**: text-to-speech and transcription
//! - **AWS SageMaker**: SigV4-signed endpoint invocations
//! - **MiniMax**: chat, TTS, and video generation
//!
//! ## Contract
//!
//! Adapters format requests in the provider's native shape, parse
//! responses back to the canonical types, and synthesize a [`Usage`]
//! record from text length when the upstream does not report one. A
//! capability the provider does not offer fails fast with
//! `ProviderError::Unsupported`; nothing is silently dropped.
//!
//! Streaming responses are lazy, non-restartable chunk sequences in
//! provider receipt order. Dropping the stream cancels the upstream read
//! and releases the transport.

use crate::error::ProviderError;
use crate::models::{
    AudioRequest, AudioResponse, Capability, CapabilityMask, ChatRequest, ChatResponse, Credential,
    EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse, SpeechRequest,
    SpeechResponse, StreamChunk, VideoRequest, VideoResponse,
};
use crate::realtime::{RealtimeConfig, RealtimeSession};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod anthropic;
pub mod cohere;
pub mod elevenlabs;
pub mod groq;
pub mod http_client;
pub mod minimax;
pub mod openai;
pub mod openrouter;
pub mod sagemaker;

/// Pinned boxed stream of chat chunks, the streaming return type.
pub type StreamResult = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Outcome of a credential verification probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuthVerification {
    Ok,
    Failed {
        reason: String,
        detail: Option<String>,
    },
}

impl AuthVerification {
    pub fn is_ok(&self) -> bool {
        matches!(self, AuthVerification::Ok)
    }

    pub fn failed(reason: impl Into<String>, detail: Option<String>) -> Self {
        AuthVerification::Failed {
            reason: reason.into(),
            detail,
        }
    }
}

/// The upstream provider families the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Cohere,
    Groq,
    OpenRouter,
    ElevenLabs,
    SageMaker,
    MiniMax,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::ElevenLabs => "elevenlabs",
            ProviderKind::SageMaker => "sagemaker",
            ProviderKind::MiniMax => "minimax",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "cohere" => Ok(ProviderKind::Cohere),
            "groq" => Ok(ProviderKind::Groq),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "elevenlabs" => Ok(ProviderKind::ElevenLabs),
            "sagemaker" => Ok(ProviderKind::SageMaker),
            "minimax" => Ok(ProviderKind::MiniMax),
            other => Err(ProviderError::Configuration {
                message: format!("unknown provider type: {other}"),
            }),
        }
    }
}

/// Configuration for one provider client instance.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub credential: Credential,
    /// Base endpoint override; adapters fall back to their default
    pub base_url: Option<String>,
    /// Per-request timeout; `None` means no client-level deadline
    pub timeout: Option<Duration>,
    /// Extra headers merged into every request
    pub headers: HashMap<String, String>,
    /// Client-visible model name to provider-side model id
    pub model_mapping: HashMap<String, String>,
    /// User-Agent sent upstream
    pub user_agent: String,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, credential: Credential) -> Self {
        Self {
            kind,
            credential,
            base_url: None,
            timeout: Some(Duration::from_secs(30)),
            headers: HashMap::new(),
            model_mapping: HashMap::new(),
            user_agent: concat!("modelrelay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_model_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.model_mapping.insert(from.into(), to.into());
        self
    }

    /// Resolve a client-visible model name through the mapping table.
    pub fn map_model(&self, model: &str) -> String {
        self.model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

/// Canonical `Unsupported` failure for a missing capability.
pub fn unsupported(capability: Capability) -> ProviderError {
    ProviderError::Unsupported {
        feature: capability.feature_name().to_string(),
    }
}

/// Unified interface every upstream provider adapter implements.
///
/// Default method bodies fail with `Unsupported`, so adapters only
/// override the operations their upstream actually offers.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, matching [`ProviderKind::as_str`].
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// The capability set this client can serve.
    fn capabilities(&self) -> CapabilityMask;

    /// Default API endpoint, before any override.
    fn default_base_url(&self) -> &'static str;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::Chat))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<StreamResult, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::Chat))
    }

    async fn embedding(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::Embeddings))
    }

    async fn image_generation(
        &self,
        request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::ImageGeneration))
    }

    async fn video_generation(
        &self,
        request: VideoRequest,
    ) -> Result<VideoResponse, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::VideoGeneration))
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::TextToSpeech))
    }

    async fn transcription(&self, request: AudioRequest) -> Result<AudioResponse, ProviderError> {
        let _ = request;
        Err(unsupported(Capability::Transcription))
    }

    /// Models this provider can serve. Synthetic for providers without a
    /// list endpoint.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Probe the credential against a free introspection endpoint.
    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError>;

    /// Open a realtime duplex session.
    async fn realtime_connect(
        &self,
        config: RealtimeConfig,
    ) -> Result<RealtimeSession, ProviderError> {
        let _ = config;
        Err(unsupported(Capability::Realtime))
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Create a provider client for a resolved deployment.
pub fn create_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config.kind {
        ProviderKind::OpenAi => Ok(Arc::new(openai::OpenAiProvider::new(config)?)),
        ProviderKind::Anthropic => Ok(Arc::new(anthropic::AnthropicProvider::new(config)?)),
        ProviderKind::Cohere => Ok(Arc::new(cohere::CohereProvider::new(config)?)),
        ProviderKind::Groq => Ok(Arc::new(groq::GroqProvider::new(config)?)),
        ProviderKind::OpenRouter => Ok(Arc::new(openrouter::OpenRouterProvider::new(config)?)),
        ProviderKind::ElevenLabs => Ok(Arc::new(elevenlabs::ElevenLabsProvider::new(config)?)),
        ProviderKind::SageMaker => Ok(Arc::new(sagemaker::SageMakerProvider::new(config)?)),
        ProviderKind::MiniMax => Ok(Arc::new(minimax::MiniMaxProvider::new(config)?)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn credential() -> Credential {
        Credential {
            id: 1,
            provider_id: 10,
            api_key: "test-key".into(),
            secondary_secret: None,
            region: None,
        }
    }

    pub fn config(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig::new(kind, credential())
    }
}
