//! # Client Composition & Factory
//!
//! Decorators that add one concern each around a base provider client,
//! and the [`ClientFactory`] that resolves deployments and composes the
//! stack inside-out:
//!
//! ```text
//! base provider → timeout → retry (+ error tracking) → cache
//!               → performance metrics → context binding
//! ```
//!
//! Each wrapper holds an inner `Arc<dyn Provider>` and forwards the
//! full provider contract, so any prefix of the stack is itself a valid
//! provider. Test-mode clients built for credential verification skip
//! the caching wrapper.

use crate::cache::fingerprint::{chat_fingerprint, embedding_fingerprint};
use crate::cache::ResponseCache;
use crate::config::{CacheBehavior, CacheSettings, GatewayConfig};
use crate::context::{self, CallContext};
use crate::error::{ClientError, ProviderError};
use crate::models::{
    AudioRequest, AudioResponse, CapabilityMask, ChatRequest, ChatResponse, Credential,
    EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse, ModelDeployment,
    RequestKind, SpeechRequest, SpeechResponse, VideoRequest, VideoResponse,
};
use crate::ports::{CredentialStore, ErrorRecord, ErrorTracker, ModelCostStore};
use crate::providers::{
    create_provider, AuthVerification, Provider, ProviderConfig, ProviderKind, StreamResult,
};
use crate::realtime::{RealtimeConfig, RealtimeSession};
use crate::resilience::{RetryContext, RetryPolicy, TimeoutPolicy};
use crate::validation;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Retry context for the current call, derived from the ambient
/// context when the binding layer installed one.
fn retry_context(key_id: i64, provider_id: i64) -> RetryContext {
    match context::current() {
        Some(ctx) => RetryContext {
            key_id: ctx.key_id,
            provider_id: ctx.provider_id,
            correlation_id: ctx.correlation_id,
        },
        None => RetryContext::new(key_id, provider_id),
    }
}

/// Timeout + retry decorator; the innermost wrapper.
pub struct ResilientProvider {
    inner: Arc<dyn Provider>,
    retry: RetryPolicy,
    timeouts: TimeoutPolicy,
    tracker: Arc<dyn ErrorTracker>,
    key_id: i64,
    provider_id: i64,
}

impl ResilientProvider {
    pub fn new(
        inner: Arc<dyn Provider>,
        retry: RetryPolicy,
        timeouts: TimeoutPolicy,
        tracker: Arc<dyn ErrorTracker>,
        key_id: i64,
        provider_id: i64,
    ) -> Self {
        Self {
            inner,
            retry,
            timeouts,
            tracker,
            key_id,
            provider_id,
        }
    }

    async fn run<T, F, Fut>(&self, kind: RequestKind, operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let ctx = retry_context(self.key_id, self.provider_id);
        self.timeouts
            .run(kind, self.retry.execute(ctx, &self.tracker, operation))
            .await
    }
}

#[async_trait::async_trait]
impl Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> CapabilityMask {
        self.inner.capabilities()
    }

    fn default_base_url(&self) -> &'static str {
        self.inner.default_base_url()
    }

    async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        validation::sanitize_extensions(&mut request.extensions)?;
        validation::validate_chat_request(&request)?;
        self.run(RequestKind::Chat, || self.inner.chat(request.clone()))
            .await
    }

    async fn stream_chat(&self, mut request: ChatRequest) -> Result<StreamResult, ProviderError> {
        validation::sanitize_extensions(&mut request.extensions)?;
        validation::validate_chat_request(&request)?;
        // Retry covers stream establishment; chunks are not replayed.
        self.run(RequestKind::StreamingChat, || {
            self.inner.stream_chat(request.clone())
        })
        .await
    }

    async fn embedding(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        validation::validate_embedding_request(&request)?;
        self.run(RequestKind::Embedding, || {
            self.inner.embedding(request.clone())
        })
        .await
    }

    async fn image_generation(
        &self,
        request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        validation::validate_image_request(&request)?;
        self.run(RequestKind::Image, || {
            self.inner.image_generation(request.clone())
        })
        .await
    }

    async fn video_generation(
        &self,
        request: VideoRequest,
    ) -> Result<VideoResponse, ProviderError> {
        validation::validate_video_request(&request)?;
        // Video bypasses the deadline by capability; retry still applies.
        self.run(RequestKind::Video, || {
            self.inner.video_generation(request.clone())
        })
        .await
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        validation::validate_speech_request(&request)?;
        self.run(RequestKind::TextToSpeech, || {
            self.inner.text_to_speech(request.clone())
        })
        .await
    }

    async fn transcription(&self, request: AudioRequest) -> Result<AudioResponse, ProviderError> {
        validation::validate_audio_request(&request)?;
        self.run(RequestKind::Transcription, || {
            self.inner.transcription(request.clone())
        })
        .await
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.run(RequestKind::Chat, || self.inner.list_models()).await
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        self.run(RequestKind::Chat, || self.inner.verify_auth()).await
    }

    async fn realtime_connect(
        &self,
        config: RealtimeConfig,
    ) -> Result<RealtimeSession, ProviderError> {
        self.run(RequestKind::RealtimeConnect, || {
            self.inner.realtime_connect(config.clone())
        })
        .await
    }
}

/// Response-cache decorator for the cacheable request kinds.
pub struct CachedProvider {
    inner: Arc<dyn Provider>,
    cache: Arc<ResponseCache>,
    settings: CacheSettings,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn Provider>, cache: Arc<ResponseCache>, settings: CacheSettings) -> Self {
        Self {
            inner,
            cache,
            settings,
        }
    }
}

#[async_trait::async_trait]
impl Provider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> CapabilityMask {
        self.inner.capabilities()
    }

    fn default_base_url(&self) -> &'static str {
        self.inner.default_base_url()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        if request.stream == Some(true) || !self.settings.is_enabled_for(&request.model) {
            return self.inner.chat(request).await;
        }

        let key = chat_fingerprint(&request);
        if let Some(cached) = self.cache.get_as::<ChatResponse>(&key, &request.model) {
            tracing::debug!(model = %request.model, "chat served from cache");
            return Ok(cached);
        }

        let ttl = self.settings.ttl_for(&request.model);
        let response = self.inner.chat(request).await?;
        self.cache.insert_value(&key, &response, Some(ttl));
        Ok(response)
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<StreamResult, ProviderError> {
        self.inner.stream_chat(request).await
    }

    async fn embedding(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        if !self.settings.is_enabled_for(&request.model) {
            return self.inner.embedding(request).await;
        }

        let key = embedding_fingerprint(&request);
        if let Some(cached) = self.cache.get_as::<EmbeddingResponse>(&key, &request.model) {
            return Ok(cached);
        }

        let ttl = self.settings.ttl_for(&request.model);
        let response = self.inner.embedding(request).await?;
        self.cache.insert_value(&key, &response, Some(ttl));
        Ok(response)
    }

    async fn image_generation(
        &self,
        request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        self.inner.image_generation(request).await
    }

    async fn video_generation(
        &self,
        request: VideoRequest,
    ) -> Result<VideoResponse, ProviderError> {
        self.inner.video_generation(request).await
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        self.inner.text_to_speech(request).await
    }

    async fn transcription(&self, request: AudioRequest) -> Result<AudioResponse, ProviderError> {
        self.inner.transcription(request).await
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        self.inner.verify_auth().await
    }

    async fn realtime_connect(
        &self,
        config: RealtimeConfig,
    ) -> Result<RealtimeSession, ProviderError> {
        self.inner.realtime_connect(config).await
    }
}

#[derive(Default)]
struct CallCounters {
    total: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Per-provider call metrics with atomic increments.
#[derive(Default)]
pub struct ClientMetrics {
    providers: DashMap<String, Arc<CallCounters>>,
}

/// Immutable per-provider metrics view.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMetricsSnapshot {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub average_latency_ms: f64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, provider: &str, success: bool, latency_ms: u64) {
        let counters = self
            .providers
            .entry(provider.to_string())
            .or_default()
            .clone();
        counters.total.fetch_add(1, Ordering::Relaxed);
        if !success {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, provider: &str) -> Option<ClientMetricsSnapshot> {
        let counters = self.providers.get(provider)?;
        let total = counters.total.load(Ordering::Relaxed);
        Some(ClientMetricsSnapshot {
            total_calls: total,
            failed_calls: counters.failed.load(Ordering::Relaxed),
            average_latency_ms: if total == 0 {
                0.0
            } else {
                counters.total_latency_ms.load(Ordering::Relaxed) as f64 / total as f64
            },
        })
    }
}

/// Outermost decorator: latency metrics plus per-call context binding.
///
/// Installs the `(key_id, provider_id)` ambient for the duration of
/// every call so the layers below can tag error records, and captures
/// every exit path. For streams it reports at most one error record
/// per stream, unwrapping to the innermost status-bearing failure.
pub struct MeasuredProvider {
    inner: Arc<dyn Provider>,
    metrics: Arc<ClientMetrics>,
    tracker: Arc<dyn ErrorTracker>,
    key_id: i64,
    provider_id: i64,
}

impl MeasuredProvider {
    pub fn new(
        inner: Arc<dyn Provider>,
        metrics: Arc<ClientMetrics>,
        tracker: Arc<dyn ErrorTracker>,
        key_id: i64,
        provider_id: i64,
    ) -> Self {
        Self {
            inner,
            metrics,
            tracker,
            key_id,
            provider_id,
        }
    }

    async fn measured<T, Fut>(&self, operation: Fut) -> Result<T, ProviderError>
    where
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let ctx = CallContext::new(self.key_id, self.provider_id);
        let provider = self.inner.name().to_string();
        let started = Instant::now();
        let result = context::with_context(ctx, operation).await;
        self.metrics.record(
            &provider,
            result.is_ok(),
            started.elapsed().as_millis() as u64,
        );
        result
    }
}

#[async_trait::async_trait]
impl Provider for MeasuredProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> CapabilityMask {
        self.inner.capabilities()
    }

    fn default_base_url(&self) -> &'static str {
        self.inner.default_base_url()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.measured(self.inner.chat(request)).await
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<StreamResult, ProviderError> {
        let ctx = CallContext::new(self.key_id, self.provider_id);
        let provider = self.inner.name().to_string();
        let started = Instant::now();

        let stream = context::with_context(ctx, self.inner.stream_chat(request)).await;
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.metrics
                    .record(&provider, false, started.elapsed().as_millis() as u64);
                return Err(e);
            }
        };
        self.metrics
            .record(&provider, true, started.elapsed().as_millis() as u64);

        // One error record per stream, no matter how many error chunks
        // the transport produces.
        let tracker = self.tracker.clone();
        let reported = Arc::new(AtomicBool::new(false));
        let key_id = self.key_id;
        let provider_id = self.provider_id;
        let correlation_id = ctx.correlation_id;

        let wrapped = stream.map(move |chunk| {
            if let Err(error) = &chunk {
                let kind = error.kind();
                if kind.is_tracked() && !reported.swap(true, Ordering::SeqCst) {
                    tracker.record(ErrorRecord {
                        key_id,
                        provider_id,
                        kind,
                        http_status: Some(error.status_code()),
                        attempt: 1,
                        correlation_id,
                    });
                }
            }
            chunk
        });

        Ok(Box::pin(wrapped))
    }

    async fn embedding(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        self.measured(self.inner.embedding(request)).await
    }

    async fn image_generation(
        &self,
        request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        self.measured(self.inner.image_generation(request)).await
    }

    async fn video_generation(
        &self,
        request: VideoRequest,
    ) -> Result<VideoResponse, ProviderError> {
        self.measured(self.inner.video_generation(request)).await
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        self.measured(self.inner.text_to_speech(request)).await
    }

    async fn transcription(&self, request: AudioRequest) -> Result<AudioResponse, ProviderError> {
        self.measured(self.inner.transcription(request)).await
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.measured(self.inner.list_models()).await
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        self.measured(self.inner.verify_auth()).await
    }

    async fn realtime_connect(
        &self,
        config: RealtimeConfig,
    ) -> Result<RealtimeSession, ProviderError> {
        self.measured(self.inner.realtime_connect(config)).await
    }
}

/// Builds fully wrapped provider clients and caches them per key.
pub struct ClientFactory {
    credentials: Arc<dyn CredentialStore>,
    models: Arc<dyn ModelCostStore>,
    tracker: Arc<dyn ErrorTracker>,
    config: GatewayConfig,
    cache: Arc<ResponseCache>,
    metrics: Arc<ClientMetrics>,
    clients: DashMap<String, Arc<dyn Provider>>,
    routes: DashMap<String, ModelDeployment>,
    /// Expected credential provider id per provider kind, when known
    provider_ids: DashMap<ProviderKind, i64>,
}

impl ClientFactory {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        models: Arc<dyn ModelCostStore>,
        tracker: Arc<dyn ErrorTracker>,
        config: GatewayConfig,
    ) -> Self {
        let cache = Arc::new(ResponseCache::with_defaults(
            config.cache.default_ttl(),
            config.cache.max_entries,
        ));
        Self {
            credentials,
            models,
            tracker,
            config,
            cache,
            metrics: Arc::new(ClientMetrics::new()),
            clients: DashMap::new(),
            routes: DashMap::new(),
            provider_ids: DashMap::new(),
        }
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.metrics.clone()
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    /// Register a local routing entry; the model cost store is
    /// consulted first, this map second.
    pub fn register_route(&self, alias: impl Into<String>, deployment: ModelDeployment) {
        self.routes.insert(alias.into(), deployment);
    }

    /// Declare which credential provider id a provider kind expects.
    pub fn register_provider_id(&self, kind: ProviderKind, provider_id: i64) {
        self.provider_ids.insert(kind, provider_id);
    }

    async fn resolve_deployment(&self, alias: &str) -> Result<ModelDeployment, ClientError> {
        if let Some(deployment) = self.models.deployment(alias).await {
            return Ok(deployment);
        }
        self.routes
            .get(alias)
            .map(|d| d.clone())
            .ok_or_else(|| ClientError::Configuration {
                message: format!("no deployment configured for model {alias}"),
            })
    }

    async fn resolve_credential(
        &self,
        deployment: &ModelDeployment,
    ) -> Result<Credential, ClientError> {
        let credential = self
            .credentials
            .credential(deployment.credential_id)
            .await
            .ok_or_else(|| ClientError::Configuration {
                message: format!("missing credential {}", deployment.credential_id),
            })?;

        if let Some(expected) = self.provider_ids.get(&deployment.provider) {
            if *expected != credential.provider_id {
                return Err(ClientError::Configuration {
                    message: format!(
                        "credential {} belongs to provider {}, not {}",
                        credential.id, credential.provider_id, deployment.provider
                    ),
                });
            }
        }
        Ok(credential)
    }

    fn whether_cache_composes(&self) -> bool {
        self.config.cache.is_enabled
            || self
                .config
                .cache
                .model_overrides
                .values()
                .any(|o| o.behavior == CacheBehavior::Always)
    }

    fn compose(
        &self,
        base: Arc<dyn Provider>,
        credential: &Credential,
        with_cache: bool,
    ) -> Arc<dyn Provider> {
        let resilient: Arc<dyn Provider> = Arc::new(ResilientProvider::new(
            base,
            RetryPolicy::from_config(&self.config),
            TimeoutPolicy::from_config(&self.config),
            self.tracker.clone(),
            credential.id,
            credential.provider_id,
        ));

        let cached: Arc<dyn Provider> = if with_cache && self.whether_cache_composes() {
            Arc::new(CachedProvider::new(
                resilient,
                self.cache.clone(),
                self.config.cache.clone(),
            ))
        } else {
            resilient
        };

        Arc::new(MeasuredProvider::new(
            cached,
            self.metrics.clone(),
            self.tracker.clone(),
            credential.id,
            credential.provider_id,
        ))
    }

    fn build_provider_config(
        &self,
        alias: Option<&str>,
        deployment: &ModelDeployment,
        credential: Credential,
    ) -> ProviderConfig {
        let mut model_mapping = HashMap::new();
        if let Some(alias) = alias {
            model_mapping.insert(alias.to_string(), deployment.provider_model_id.clone());
        }
        ProviderConfig {
            kind: deployment.provider,
            credential,
            base_url: deployment.base_url.clone(),
            timeout: Some(self.config.default_timeout()),
            headers: HashMap::new(),
            model_mapping,
            user_agent: concat!("modelrelay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Fully wrapped client for a logical model alias. Built once and
    /// cached; callers borrow the shared instance.
    pub async fn client_for_model(&self, alias: &str) -> Result<Arc<dyn Provider>, ClientError> {
        if let Some(client) = self.clients.get(alias) {
            return Ok(client.clone());
        }

        let deployment = self.resolve_deployment(alias).await?;
        let credential = self.resolve_credential(&deployment).await?;
        let provider_config =
            self.build_provider_config(Some(alias), &deployment, credential.clone());
        let base = create_provider(provider_config)?;
        let client = self.compose(base, &credential, true);

        self.clients.insert(alias.to_string(), client.clone());
        Ok(client)
    }

    /// Fully wrapped client for a provider id, resolved through the
    /// registered routes.
    pub async fn client_for_provider(
        &self,
        provider_id: i64,
    ) -> Result<Arc<dyn Provider>, ClientError> {
        let aliases: Vec<String> = self.routes.iter().map(|e| e.key().clone()).collect();
        for alias in aliases {
            let Ok(deployment) = self.resolve_deployment(&alias).await else {
                continue;
            };
            if let Some(credential) = self.credentials.credential(deployment.credential_id).await {
                if credential.provider_id == provider_id {
                    return self.client_for_model(&alias).await;
                }
            }
        }
        Err(ClientError::Configuration {
            message: format!("no deployment registered for provider {provider_id}"),
        })
    }

    /// Test-mode client for credential verification. Never cached and
    /// never composed with the caching wrapper. `base_url` overrides
    /// the provider default for self-hosted endpoints.
    pub fn verification_client(
        &self,
        kind: ProviderKind,
        credential: Credential,
        base_url: Option<String>,
    ) -> Result<Arc<dyn Provider>, ClientError> {
        let mut provider_config = ProviderConfig::new(kind, credential.clone())
            .with_timeout(Some(self.config.default_timeout()));
        provider_config.base_url = base_url;
        let base = create_provider(provider_config)?;
        Ok(self.compose(base, &credential, false))
    }
}
