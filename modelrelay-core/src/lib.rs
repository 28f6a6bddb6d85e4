//! # ModelRelay Core
//!
//! Gateway core for multi-provider LLM inference. Accepts OpenAI-shaped
//! requests, resolves the logical model onto a concrete upstream
//! deployment, forwards in the provider's native wire shape, and
//! applies the cross-cutting concerns a production gateway needs:
//! routing, retries with backoff, response caching, cost accounting,
//! error tracking, and realtime duplex audio sessions.
//!
//! ## Architecture
//!
//! The core composes small layers, inside-out:
//!
//! - [`providers`]: one [`providers::Provider`] adapter per upstream
//!   (OpenAI, Anthropic-compatible, Cohere, Groq, OpenRouter,
//!   ElevenLabs, AWS SageMaker, MiniMax), each translating canonical
//!   requests to native wire shapes and back.
//! - [`resilience`]: the retry/timeout envelope around every call.
//! - [`cache`]: fingerprint-keyed response cache with pluggable TTL,
//!   eviction, and size policies plus per-model metrics.
//! - [`client`]: decorator composition and the client factory.
//! - [`routing`]: strategy-driven deployment selection with live
//!   metrics feedback (latency, cost, quality, language).
//! - [`cost`]: decimal cost engine over tagged pricing models, with
//!   validated refunds.
//! - [`realtime`]: duplex audio sessions over WebSocket transports
//!   with per-provider translators.
//!
//! External collaborators (credential store, model cost store, spend
//! ledger, error tracking, object storage) are consumed through the
//! trait ports in [`ports`]; the core holds no persistence of its own.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use modelrelay_core::client::ClientFactory;
//! use modelrelay_core::config::GatewayConfig;
//! use modelrelay_core::models::{ChatRequest, Message};
//!
//! let factory = ClientFactory::new(credentials, models, tracker, GatewayConfig::default());
//! let client = factory.client_for_model("gpt-4o").await?;
//!
//! let response = client
//!     .chat(ChatRequest {
//!         model: "gpt-4o".to_string(),
//!         messages: vec![Message::user("Hello!")],
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod models;
pub mod pool;
pub mod ports;
pub mod providers;
pub mod realtime;
pub mod resilience;
pub mod routing;
pub mod validation;

pub use client::ClientFactory;
pub use config::GatewayConfig;
pub use cost::pricing::{ModelCostInfo, PricingModel};
pub use cost::CostEngine;
pub use error::{classify_status, ClientError, ErrorKind, ProviderError};
pub use models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, Credential, EmbeddingRequest,
    EmbeddingResponse, Message, ModelDeployment, RequestKind, Role, Usage,
};
pub use providers::{Provider, ProviderKind};
pub use realtime::RealtimeSession;
pub use routing::Router;
