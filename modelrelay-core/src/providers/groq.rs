//! Groq provider adapter (OpenAI-compatible API).

use crate::error::ProviderError;
use crate::models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, StreamChunk,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind, StreamResult};
use async_stream::stream;
use serde::Deserialize;

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct GroqProvider {
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

impl GroqProvider {
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
}

#[async_trait::async_trait]
impl Provider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::chat().with(Capability::JsonMode)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::providers::test_support;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-groq",
                "object": "chat.completion",
                "created": 1700000000u64,
                "model": "llama-3.3-70b-versatile",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "fast"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            })))
            .mount(&server)
            .await;

        let config = test_support::config(ProviderKind::Groq).with_base_url(server.uri());
        let provider = GroqProvider::new(config).unwrap();
        let response = provider
            .chat(ChatRequest {
                model: "llama-3.3-70b-versatile".into(),
                messages: vec![Message::user("quick")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "fast");
    }
}
