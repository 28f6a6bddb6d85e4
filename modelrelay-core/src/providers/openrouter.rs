//! OpenRouter provider adapter (OpenAI-compatible aggregation).
//!
//! OpenRouter asks integrators to identify themselves with
//! `HTTP-Referer` and `X-Title` headers; both are attached to every
//! request alongside the bearer credential.

use crate::error::ProviderError;
use crate::models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
    StreamChunk,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind, StreamResult};
use async_stream::stream;
use serde::Deserialize;

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_REFERER: &str = "https://github.com/modelrelay/modelrelay";
const DEFAULT_TITLE: &str = "ModelRelay Gateway";

pub struct OpenRouterProvider {
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

impl OpenRouterProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = config.headers.clone();
        headers
            .entry("HTTP-Referer".to_string())
            .or_insert_with(|| DEFAULT_REFERER.to_string());
        headers
            .entry("X-Title".to_string())
            .or_insert_with(|| DEFAULT_TITLE.to_string());
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
}

#[async_trait::async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::chat()
            .with(Capability::Vision)
            .with(Capability::Embeddings)
            .with(Capability::JsonMode)
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        request.model = self.config.map_model(&request.model);
        request.stream = Some(false);
        self.http.post_json("/chat/completions", &request).await
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

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let list: ModelList = self.http.get_json("/models").await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        // /key returns the key's own metadata and is free to call.
        match self.http.get_json::<serde_json::Value>("/key").await {
            Ok(_) => Ok(AuthVerification::Ok),
            Err(e) if !e.is_retryable() => Ok(AuthVerification::failed(
                e.kind().machine_code(),
                Some(e.to_string()),
            )),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::providers::test_support;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn attaches_referral_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("HTTP-Referer", DEFAULT_REFERER))
            .and(header("X-Title", DEFAULT_TITLE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-1",
                "object": "chat.completion",
                "created": 1700000000u64,
                "model": "openai/gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "routed"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}
            })))
            .mount(&server)
            .await;

        let config = test_support::config(ProviderKind::OpenRouter).with_base_url(server.uri());
        let provider = OpenRouterProvider::new(config).unwrap();
        let response = provider
            .chat(ChatRequest {
                model: "openai/gpt-4o".into(),
                messages: vec![Message::user("route me")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "routed");
    }

    #[tokio::test]
    async fn custom_referer_overrides_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/key"))
            .and(header("HTTP-Referer", "https://my.app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {}})))
            .mount(&server)
            .await;

        let config = test_support::config(ProviderKind::OpenRouter)
            .with_base_url(server.uri())
            .with_header("HTTP-Referer", "https://my.app");
        let provider = OpenRouterProvider::new(config).unwrap();
        assert!(provider.verify_auth().await.unwrap().is_ok());
    }
}
