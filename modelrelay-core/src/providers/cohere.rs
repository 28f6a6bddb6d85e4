//! Cohere provider adapter.
//!
//! Cohere's chat API is not chat-ML shaped: the latest user turn is the
//! `message`, prior turns ride in `chat_history` with upper-case roles,
//! and system messages become the `preamble`.

use crate::error::ProviderError;
use crate::models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, Choice, Embedding, EmbeddingInput,
    EmbeddingRequest, EmbeddingResponse, Message, Role, Usage,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind, StreamResult};
use async_stream::stream;
use serde::{Deserialize, Serialize};

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

pub struct CohereProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct CohereChatRequest {
    model: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chat_history: Vec<CohereTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CohereTurn {
    role: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CohereChatResponse {
    text: String,
    generation_id: Option<String>,
    finish_reason: Option<String>,
    meta: Option<CohereMeta>,
}

#[derive(Debug, Deserialize)]
struct CohereMeta {
    billed_units: Option<CohereBilledUnits>,
}

#[derive(Debug, Deserialize)]
struct CohereBilledUnits {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    search_units: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CohereEmbedRequest {
    model: String,
    texts: Vec<String>,
    input_type: String,
}

#[derive(Debug, Deserialize)]
struct CohereEmbedResponse {
    embeddings: Vec<Vec<f32>>,
    meta: Option<CohereMeta>,
}

#[derive(Debug, Deserialize)]
struct CohereModelList {
    models: Vec<CohereModel>,
}

#[derive(Debug, Deserialize)]
struct CohereModel {
    name: String,
}

impl CohereProvider {
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

    fn build_request(&self, request: &ChatRequest, streaming: bool) -> CohereChatRequest {
        let mut preamble = String::new();
        let mut history = Vec::new();
        let mut message = String::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => {
                    if !preamble.is_empty() {
                        preamble.push('\n');
                    }
                    preamble.push_str(&msg.content);
                }
                Role::User | Role::Tool => history.push(CohereTurn {
                    role: "USER".to_string(),
                    message: msg.content.clone(),
                }),
                Role::Assistant => history.push(CohereTurn {
                    role: "CHATBOT".to_string(),
                    message: msg.content.clone(),
                }),
            }
        }

        // The trailing user turn becomes the message field.
        if let Some(pos) = history.iter().rposition(|t| t.role == "USER") {
            message = history.remove(pos).message;
        }

        CohereChatRequest {
            model: self.config.map_model(&request.model),
            message,
            chat_history: history,
            preamble: (!preamble.is_empty()).then_some(preamble),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(streaming),
        }
    }

    fn convert_response(
        &self,
        model: &str,
        request: &CohereChatRequest,
        response: CohereChatResponse,
    ) -> ChatResponse {
        let billed = response.meta.and_then(|m| m.billed_units);
        let usage = match billed {
            Some(units) => Usage {
                prompt_tokens: units.input_tokens,
                completion_tokens: units.output_tokens,
                total_tokens: match (units.input_tokens, units.output_tokens) {
                    (Some(i), Some(o)) => Some(i + o),
                    _ => None,
                },
                search_units: units.search_units,
                ..Default::default()
            },
            None => Usage::estimated_from_text(&request.message, &response.text),
        };

        ChatResponse {
            id: response
                .generation_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(response.text),
                finish_reason: response.finish_reason,
                logprobs: None,
            }],
            usage: Some(usage),
            system_fingerprint: None,
        }
    }
}

#[async_trait::async_trait]
impl Provider for CohereProvider {
    fn name(&self) -> &str {
        "cohere"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Cohere
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::of(&[
            Capability::Chat,
            Capability::TextGeneration,
            Capability::Embeddings,
        ])
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let cohere_request = self.build_request(&request, false);
        let response: CohereChatResponse =
            self.http.post_json("/v1/chat", &cohere_request).await?;
        Ok(self.convert_response(&request.model, &cohere_request, response))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<StreamResult, ProviderError> {
        let cohere_request = self.build_request(&request, true);
        let model = request.model.clone();

        let response = self.http.post_json_raw("/v1/chat", &cohere_request).await?;
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

                        // Cohere streams newline-delimited JSON events.
                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();
                            if line.is_empty() {
                                continue;
                            }

                            match serde_json::from_str::<serde_json::Value>(&line) {
                                Ok(event) => {
                                    let event_type = event
                                        .get("event_type")
                                        .and_then(|t| t.as_str())
                                        .unwrap_or("");
                                    match event_type {
                                        "text-generation" => {
                                            if let Some(text) =
                                                event.get("text").and_then(|t| t.as_str())
                                            {
                                                yield Ok(crate::models::StreamChunk {
                                                    id: "cohere-stream".to_string(),
                                                    object: "chat.completion.chunk".to_string(),
                                                    created: chrono::Utc::now().timestamp() as u64,
                                                    model: model.clone(),
                                                    choices: vec![crate::models::StreamChoice {
                                                        index: 0,
                                                        delta: crate::models::Delta {
                                                            content: Some(text.to_string()),
                                                            ..Default::default()
                                                        },
                                                        finish_reason: None,
                                                    }],
                                                    usage: None,
                                                });
                                            }
                                        }
                                        "stream-end" => return,
                                        _ => {}
                                    }
                                }
                                Err(e) => yield Err(ProviderError::Protocol {
                                    message: format!("malformed stream event: {e}"),
                                }),
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
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let texts = match &request.input {
            EmbeddingInput::String(s) => vec![s.clone()],
            EmbeddingInput::StringArray(v) => v.clone(),
            _ => {
                return Err(ProviderError::InvalidRequest {
                    message: "cohere embeddings accept text input only".to_string(),
                })
            }
        };
        let model = self.config.map_model(&request.model);

        let embed_request = CohereEmbedRequest {
            model: model.clone(),
            texts,
            input_type: "search_document".to_string(),
        };
        let response: CohereEmbedResponse =
            self.http.post_json("/v1/embed", &embed_request).await?;

        let input_tokens = response
            .meta
            .and_then(|m| m.billed_units)
            .and_then(|u| u.input_tokens);
        let usage = Usage {
            prompt_tokens: input_tokens,
            completion_tokens: Some(0),
            total_tokens: input_tokens,
            estimated: input_tokens.is_none(),
            ..Default::default()
        };

        Ok(EmbeddingResponse {
            object: "list".to_string(),
            data: response
                .embeddings
                .into_iter()
                .enumerate()
                .map(|(index, embedding)| Embedding {
                    object: "embedding".to_string(),
                    embedding,
                    index: index as u32,
                })
                .collect(),
            model,
            usage,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let list: CohereModelList = self.http.get_json("/v1/models").await?;
        Ok(list.models.into_iter().map(|m| m.name).collect())
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        match self.http.get_json::<serde_json::Value>("/v1/models").await {
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
    use crate::providers::test_support;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> CohereProvider {
        let config = test_support::config(ProviderKind::Cohere).with_base_url(server.uri());
        CohereProvider::new(config).unwrap()
    }

    #[test]
    fn last_user_turn_becomes_message() {
        let server_config = test_support::config(ProviderKind::Cohere);
        let provider = CohereProvider::new(server_config).unwrap();
        let request = ChatRequest {
            model: "command-r".into(),
            messages: vec![
                Message::system("Short answers."),
                Message::user("First question"),
                Message::assistant("First answer"),
                Message::user("Second question"),
            ],
            ..Default::default()
        };
        let converted = provider.build_request(&request, false);
        assert_eq!(converted.message, "Second question");
        assert_eq!(converted.preamble.as_deref(), Some("Short answers."));
        assert_eq!(converted.chat_history.len(), 2);
        assert_eq!(converted.chat_history[0].role, "USER");
        assert_eq!(converted.chat_history[1].role, "CHATBOT");
    }

    #[tokio::test]
    async fn chat_parses_billed_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(body_partial_json(serde_json::json!({"model": "command-r"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "Here you go.",
                "generation_id": "gen_1",
                "finish_reason": "COMPLETE",
                "meta": {"billed_units": {"input_tokens": 30, "output_tokens": 5}}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(ChatRequest {
                model: "command-r".into(),
                messages: vec![Message::user("Go")],
                ..Default::default()
            })
            .await
            .unwrap();
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(30));
        assert_eq!(usage.total_tokens, Some(35));
        assert!(!usage.estimated);
    }

    #[tokio::test]
    async fn embedding_converts_to_canonical_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]],
                "meta": {"billed_units": {"input_tokens": 12}}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .embedding(EmbeddingRequest {
                model: "embed-english-v3.0".into(),
                input: EmbeddingInput::StringArray(vec!["a".into(), "b".into()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[1].index, 1);
        assert_eq!(response.usage.prompt_tokens, Some(12));
    }
}
