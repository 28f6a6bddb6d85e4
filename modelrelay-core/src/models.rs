//! # Canonical Model Types
//!
//! Provider-agnostic request and response shapes for every operation the
//! gateway dispatches: chat (plain and streaming), embeddings, image and
//! video generation, text-to-speech, transcription, and realtime
//! connect. All shapes are OpenAI-derived so the inbound surface can map
//! onto them without translation; provider adapters translate them to
//! native wire formats.
//!
//! The [`Usage`] record is the common currency between adapters, the
//! cost engine, and the spend ledger: every response carries one, and
//! adapters synthesize token counts (4 characters per token) when a
//! provider does not report them.
//!
//! ## Extensions
//!
//! [`ChatRequest`] carries an opaque `extensions` map of provider- or
//! deployment-specific parameters. It is flattened into the serialized
//! request, participates in cache fingerprints, and is sanitized before
//! dispatch (see `validation`).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Heuristic token estimate for providers that do not report usage.
///
/// One token per four characters, minimum one token for non-empty text.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        0
    } else {
        ((text.len() as u32) / 4).max(1)
    }
}

/// A capability a provider deployment may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    TextGeneration,
    Embeddings,
    ImageGeneration,
    Vision,
    FunctionCalling,
    ToolUsage,
    JsonMode,
    TextToSpeech,
    Transcription,
    Realtime,
    VideoGeneration,
}

impl Capability {
    /// Feature name used in `Unsupported` errors.
    pub fn feature_name(self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::TextGeneration => "text generation",
            Capability::Embeddings => "embeddings",
            Capability::ImageGeneration => "image generation",
            Capability::Vision => "vision",
            Capability::FunctionCalling => "function calling",
            Capability::ToolUsage => "tool usage",
            Capability::JsonMode => "json mode",
            Capability::TextToSpeech => "text-to-speech",
            Capability::Transcription => "transcription",
            Capability::Realtime => "realtime",
            Capability::VideoGeneration => "video generation",
        }
    }
}

/// Boolean capability set attached to a provider deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMask {
    caps: HashSet<Capability>,
}

impl CapabilityMask {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mask for a conversational text deployment.
    pub fn chat() -> Self {
        Self::of(&[
            Capability::Chat,
            Capability::TextGeneration,
            Capability::FunctionCalling,
            Capability::ToolUsage,
        ])
    }

    pub fn of(caps: &[Capability]) -> Self {
        Self {
            caps: caps.iter().copied().collect(),
        }
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.caps.insert(cap);
        self
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// True when every capability in `other` is present here.
    pub fn covers(&self, other: &CapabilityMask) -> bool {
        other.caps.is_subset(&self.caps)
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }
}

/// Credential reference resolved from the external credential store.
///
/// The core holds credentials by id only; it never persists them, and
/// the secret material is redacted from debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque key id assigned by the store
    pub id: i64,
    /// Provider the credential belongs to
    pub provider_id: i64,
    /// Primary secret (API key / access key id)
    pub api_key: String,
    /// Secondary secret where the provider needs one (e.g. AWS secret key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_secret: Option<String>,
    /// Provider region, for region-scoped endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("provider_id", &self.provider_id)
            .field("api_key", &"<redacted>")
            .field("secondary_secret", &self.secondary_secret.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

/// Concrete deployment a logical model alias resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDeployment {
    /// Provider type that serves this deployment
    pub provider: crate::providers::ProviderKind,
    /// Provider-side model identifier
    pub provider_model_id: String,
    /// Credential handle in the external store
    pub credential_id: i64,
    /// Base endpoint override, when not using the provider default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Capabilities this deployment offers
    pub capabilities: CapabilityMask,
}

/// Chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    /// Logical model alias
    pub model: String,
    /// Conversation to complete
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Provider- or deployment-specific parameters, passed through opaque
    #[serde(flatten)]
    pub extensions: HashMap<String, serde_json::Value>,
}

/// Chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<serde_json::Value>,
}

/// Search-result accounting attached to search-unit usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Documents retrieved by the search tool
    pub documents: u32,
    /// Documents that were chunked before retrieval
    pub chunked_documents: u32,
}

/// Per-call usage record.
///
/// Every counted unit is optional; absent means "not reported". The
/// `estimated` flag marks counts synthesized from text length rather
/// than reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Prompt tokens served from the provider's prompt cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
    /// Prompt tokens written into the provider's prompt cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_write_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_units: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_metadata: Option<SearchMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_characters: Option<u64>,
    /// Whether this call ran through a provider batch endpoint
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_batch: bool,
    /// True when token counts were synthesized rather than reported
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub estimated: bool,
}

impl Usage {
    /// Usage with reported token counts.
    pub fn for_tokens(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
            ..Default::default()
        }
    }

    /// Usage synthesized from prompt and completion text lengths.
    pub fn estimated_from_text(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = estimate_tokens(prompt) as u64;
        let completion_tokens = estimate_tokens(completion) as u64;
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens + completion_tokens),
            estimated: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    None,
    Auto,
    Required,
    Specific { function: FunctionChoice },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionChoice {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: EmbeddingInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for EmbeddingRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            input: EmbeddingInput::String(String::new()),
            encoding_format: None,
            dimensions: None,
            user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    String(String),
    StringArray(Vec<String>),
    TokenArray(Vec<u32>),
    TokenArrayArray(Vec<Vec<u32>>),
}

impl EmbeddingInput {
    /// Whether the input carries any content at all.
    pub fn is_empty(&self) -> bool {
        match self {
            EmbeddingInput::String(s) => s.is_empty(),
            EmbeddingInput::StringArray(v) => v.is_empty() || v.iter().all(|s| s.is_empty()),
            EmbeddingInput::TokenArray(v) => v.is_empty(),
            EmbeddingInput::TokenArrayArray(v) => v.is_empty() || v.iter().all(|t| t.is_empty()),
        }
    }

    /// Concatenated text content, for fingerprints and token estimates.
    pub fn joined_text(&self) -> String {
        match self {
            EmbeddingInput::String(s) => s.clone(),
            EmbeddingInput::StringArray(v) => v.join("\n"),
            EmbeddingInput::TokenArray(v) => format!("{v:?}"),
            EmbeddingInput::TokenArrayArray(v) => format!("{v:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<Embedding>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub object: String,
    pub embedding: Vec<f32>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub created: u64,
    pub data: Vec<ImageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VideoRequest {
    pub prompt: String,
    pub model: Option<String>,
    /// Requested clip length in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Requested resolution tag, e.g. `"720p"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoResponse {
    pub created: u64,
    pub data: Vec<VideoData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRequest {
    /// Raw audio bytes to transcribe
    #[serde(skip)]
    pub file: Vec<u8>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechResponse {
    /// Encoded audio payload as returned by the provider
    pub audio: Vec<u8>,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
    /// Some providers attach usage to the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaToolCall {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<DeltaFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The kind of operation a request asks for, used by routing filters
/// and cache eligibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    StreamingChat,
    Embedding,
    Image,
    Video,
    TextToSpeech,
    Transcription,
    RealtimeConnect,
}

impl RequestKind {
    /// The capability a deployment must offer to serve this kind.
    pub fn required_capability(self) -> Capability {
        match self {
            RequestKind::Chat | RequestKind::StreamingChat => Capability::Chat,
            RequestKind::Embedding => Capability::Embeddings,
            RequestKind::Image => Capability::ImageGeneration,
            RequestKind::Video => Capability::VideoGeneration,
            RequestKind::TextToSpeech => Capability::TextToSpeech,
            RequestKind::Transcription => Capability::Transcription,
            RequestKind::RealtimeConnect => Capability::Realtime,
        }
    }

    /// Whether responses of this kind are eligible for the response cache.
    pub fn is_cacheable(self) -> bool {
        matches!(self, RequestKind::Chat | RequestKind::Embedding)
    }

    /// Whether calls of this kind bypass the outer timeout policy.
    pub fn bypasses_timeout(self) -> bool {
        matches!(self, RequestKind::Video | RequestKind::RealtimeConnect)
    }
}
