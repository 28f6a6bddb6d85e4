//! Anthropic-compatible provider adapter.
//!
//! Translates canonical chat requests into the Claude messages API:
//! system messages are lifted into the top-level `system` field, tools
//! map onto Anthropic tool definitions, and the usage record carries the
//! prompt-cache read/write token counts the API reports.

use crate::error::ProviderError;
use crate::models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, Choice, Delta, Message, Role,
    StreamChunk, StreamChoice, Tool, ToolCall, Usage,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind, StreamResult};
use async_stream::stream;
use serde::{Deserialize, Serialize};

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = config.headers.clone();
        headers.insert("anthropic-version".to_string(), API_VERSION.to_string());
        headers.insert("User-Agent".to_string(), config.user_agent.clone());
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE_URL,
            &headers,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: config.credential.api_key.clone(),
            },
        )?;
        Ok(Self { http, config })
    }

    fn build_request(&self, request: &ChatRequest, streaming: bool) -> AnthropicRequest {
        let (system, messages) = Self::convert_messages(&request.messages);
        AnthropicRequest {
            model: self.config.map_model(&request.model),
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            system,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            tools: request.tools.as_ref().map(|tools| {
                tools.iter().map(Self::convert_tool).collect::<Vec<_>>()
            }),
            stream: Some(streaming),
        }
    }

    fn convert_tool(tool: &Tool) -> AnthropicTool {
        AnthropicTool {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            input_schema: tool.function.parameters.clone(),
        }
    }

    /// System messages are collected into the top-level system prompt;
    /// tool results ride along as user turns.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = String::new();
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if !msg.content.is_empty() {
                        if !system.is_empty() {
                            system.push('\n');
                        }
                        system.push_str(&msg.content);
                    }
                }
                Role::User | Role::Tool => converted.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: msg.content.clone(),
                }),
                Role::Assistant => converted.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        ((!system.is_empty()).then_some(system), converted)
    }

    fn convert_response(&self, response: AnthropicResponse) -> ChatResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for content in response.content {
            match content {
                AnthropicContent::Text { text: t } => text.push_str(&t),
                AnthropicContent::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    call_type: "function".to_string(),
                    function: crate::models::FunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                }),
            }
        }

        let usage = response.usage;
        ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response.model,
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content: text,
                    name: None,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                },
                finish_reason: response.stop_reason,
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: Some(usage.input_tokens),
                completion_tokens: Some(usage.output_tokens),
                total_tokens: Some(usage.input_tokens + usage.output_tokens),
                cached_input_tokens: usage.cache_read_input_tokens,
                cached_write_tokens: usage.cache_creation_input_tokens,
                ..Default::default()
            }),
            system_fingerprint: None,
        }
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::chat().with(Capability::Vision)
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let anthropic_request = self.build_request(&request, false);
        let response: AnthropicResponse = self
            .http
            .post_json("/v1/messages", &anthropic_request)
            .await?;
        Ok(self.convert_response(response))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<StreamResult, ProviderError> {
        let anthropic_request = self.build_request(&request, true);

        let response = self
            .http
            .post_json_raw("/v1/messages", &anthropic_request)
            .await?;
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

                            let Some(json_str) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if json_str == "[DONE]" {
                                return;
                            }

                            match serde_json::from_str::<serde_json::Value>(json_str) {
                                Ok(event) => {
                                    let event_type =
                                        event.get("type").and_then(|t| t.as_str()).unwrap_or("");
                                    if event_type == "message_stop" {
                                        return;
                                    }
                                    if let Some(delta_text) = event
                                        .get("delta")
                                        .and_then(|d| d.get("text"))
                                        .and_then(|t| t.as_str())
                                    {
                                        yield Ok(StreamChunk {
                                            id: event
                                                .get("id")
                                                .and_then(|id| id.as_str())
                                                .unwrap_or("anthropic-stream")
                                                .to_string(),
                                            object: "chat.completion.chunk".to_string(),
                                            created: chrono::Utc::now().timestamp() as u64,
                                            model: String::new(),
                                            choices: vec![StreamChoice {
                                                index: 0,
                                                delta: Delta {
                                                    content: Some(delta_text.to_string()),
                                                    ..Default::default()
                                                },
                                                finish_reason: None,
                                            }],
                                            usage: None,
                                        });
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

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        // No public list endpoint; synthesize from the known families.
        Ok(vec![
            "claude-3-5-sonnet-latest".to_string(),
            "claude-3-5-haiku-latest".to_string(),
            "claude-3-opus-latest".to_string(),
        ])
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        // Minimal one-token completion is the cheapest auth probe offered.
        let probe = AnthropicRequest {
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 1,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: "Hi".to_string(),
            }],
            system: None,
            temperature: Some(0.0),
            top_p: None,
            stop_sequences: None,
            tools: None,
            stream: Some(false),
        };

        match self
            .http
            .post_json::<_, serde_json::Value>("/v1/messages", &probe)
            .await
        {
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
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> AnthropicProvider {
        let config = test_support::config(ProviderKind::Anthropic).with_base_url(server.uri());
        AnthropicProvider::new(config).unwrap()
    }

    #[test]
    fn system_messages_are_lifted() {
        let messages = vec![
            Message::system("Be terse."),
            Message::system("Answer in French."),
            Message::user("Bonjour"),
        ];
        let (system, converted) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("Be terse.\nAnswer in French."));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[tokio::test]
    async fn chat_maps_usage_including_cache_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Bonjour!"}],
                "model": "claude-3-5-sonnet-latest",
                "stop_reason": "end_turn",
                "usage": {
                    "input_tokens": 120,
                    "output_tokens": 8,
                    "cache_read_input_tokens": 100,
                    "cache_creation_input_tokens": 10
                }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(ChatRequest {
                model: "claude-3-5-sonnet-latest".into(),
                messages: vec![Message::user("Bonjour")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.choices[0].message.content, "Bonjour!");
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(120));
        assert_eq!(usage.cached_input_tokens, Some(100));
        assert_eq!(usage.cached_write_tokens, Some(10));
        assert_eq!(usage.total_tokens, Some(128));
    }

    #[tokio::test]
    async fn tool_use_maps_to_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_2",
                "type": "message",
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
                     "input": {"location": "Paris"}}
                ],
                "model": "claude-3-5-sonnet-latest",
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 50, "output_tokens": 20}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(ChatRequest {
                model: "claude-3-5-sonnet-latest".into(),
                messages: vec![Message::user("Weather in Paris?")],
                ..Default::default()
            })
            .await
            .unwrap();

        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert!(calls[0].function.arguments.contains("Paris"));
    }
}
