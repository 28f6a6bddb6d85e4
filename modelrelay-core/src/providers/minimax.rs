//! MiniMax provider adapter.
//!
//! Chat rides the OpenAI-compatible `chatcompletion_v2` endpoint, TTS
//! uses `t2a_v2` with hex-encoded audio, and video generation is an
//! async task pair: submit, then poll until the clip is ready. MiniMax
//! reports errors through an in-body `base_resp` envelope even on
//! HTTP 200, so every response is checked twice.

use crate::error::ProviderError;
use crate::models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, SpeechRequest, SpeechResponse, Usage,
    VideoData, VideoRequest, VideoResponse,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::http_client::{AuthStrategy, HttpProviderClient};

const DEFAULT_BASE_URL: &str = "https://api.minimax.io";
const VIDEO_POLL_INTERVAL: Duration = Duration::from_secs(2);
const VIDEO_POLL_ATTEMPTS: u32 = 300;

pub struct MiniMaxProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Debug, Deserialize)]
struct MiniMaxChatResponse {
    #[serde(flatten)]
    response: serde_json::Value,
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Serialize)]
struct TtsRequest {
    model: String,
    text: String,
    voice_setting: VoiceSetting,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_setting: Option<AudioSetting>,
}

#[derive(Debug, Serialize)]
struct VoiceSetting {
    voice_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AudioSetting {
    format: String,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    data: Option<TtsData>,
    extra_info: Option<TtsExtraInfo>,
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
struct TtsData {
    /// Hex-encoded audio payload
    audio: String,
}

#[derive(Debug, Deserialize)]
struct TtsExtraInfo {
    #[serde(default)]
    audio_length: Option<f64>,
    #[serde(default)]
    usage_characters: Option<u64>,
}

#[derive(Debug, Serialize)]
struct VideoSubmitRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoSubmitResponse {
    task_id: Option<String>,
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
struct VideoStatusResponse {
    status: Option<String>,
    video_url: Option<String>,
    base_resp: Option<BaseResp>,
}

/// Map a non-zero `base_resp` envelope onto the error taxonomy.
fn check_base_resp(base: Option<BaseResp>) -> Result<(), ProviderError> {
    match base {
        Some(resp) if resp.status_code != 0 => Err(match resp.status_code {
            1004 => ProviderError::InvalidApiKey,
            1008 => ProviderError::InsufficientBalance,
            1002 => ProviderError::RateLimit {
                retry_after: None,
                detail: Default::default(),
            },
            code => ProviderError::Api {
                code: code.try_into().unwrap_or(500),
                message: resp.status_msg,
            },
        }),
        _ => Ok(()),
    }
}

fn decode_hex_audio(hex: &str) -> Result<Vec<u8>, ProviderError> {
    if hex.len() % 2 != 0 {
        return Err(ProviderError::Protocol {
            message: "odd-length hex audio payload".to_string(),
        });
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ProviderError::Protocol {
                message: "invalid hex audio payload".to_string(),
            })
        })
        .collect()
}

impl MiniMaxProvider {
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
impl Provider for MiniMaxProvider {
    fn name(&self) -> &str {
        "minimax"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::MiniMax
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::chat()
            .with(Capability::TextToSpeech)
            .with(Capability::VideoGeneration)
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        request.model = self.config.map_model(&request.model);
        request.stream = Some(false);

        let envelope: MiniMaxChatResponse = self
            .http
            .post_json("/v1/text/chatcompletion_v2", &request)
            .await?;
        check_base_resp(envelope.base_resp)?;

        let mut response: ChatResponse = serde_json::from_value(envelope.response)
            .map_err(|e| ProviderError::Protocol {
                message: format!("malformed chat completion body: {e}"),
            })?;
        if response.usage.is_none() {
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
        Ok(response)
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        let character_count = request.input.len() as u64;
        let tts_request = TtsRequest {
            model: self.config.map_model(&request.model),
            text: request.input,
            voice_setting: VoiceSetting {
                voice_id: request.voice,
                speed: request.speed,
            },
            audio_setting: request.response_format.map(|format| AudioSetting { format }),
        };

        let response: TtsResponse = self.http.post_json("/v1/t2a_v2", &tts_request).await?;
        check_base_resp(response.base_resp)?;

        let data = response.data.ok_or_else(|| ProviderError::Protocol {
            message: "t2a_v2 response carried no audio data".to_string(),
        })?;
        let audio = decode_hex_audio(&data.audio)?;

        let extra = response.extra_info;
        Ok(SpeechResponse {
            audio,
            content_type: "audio/mpeg".to_string(),
            usage: Some(Usage {
                audio_seconds: extra.as_ref().and_then(|e| e.audio_length),
                audio_characters: extra
                    .as_ref()
                    .and_then(|e| e.usage_characters)
                    .or(Some(character_count)),
                ..Default::default()
            }),
        })
    }

    async fn video_generation(
        &self,
        request: VideoRequest,
    ) -> Result<VideoResponse, ProviderError> {
        let model = request
            .model
            .as_deref()
            .map(|m| self.config.map_model(m))
            .unwrap_or_else(|| "video-01".to_string());

        let submit = VideoSubmitRequest {
            model,
            prompt: request.prompt.clone(),
            duration: request.duration_seconds,
            resolution: request.resolution.clone(),
        };
        let submitted: VideoSubmitResponse = self
            .http
            .post_json("/v1/video_generation", &submit)
            .await?;
        check_base_resp(submitted.base_resp)?;
        let task_id = submitted.task_id.ok_or_else(|| ProviderError::Protocol {
            message: "video submission returned no task id".to_string(),
        })?;

        // Generations run for minutes; poll until the task resolves.
        for _ in 0..VIDEO_POLL_ATTEMPTS {
            let status: VideoStatusResponse = self
                .http
                .get_json(&format!("/v1/query/video_generation?task_id={task_id}"))
                .await?;
            check_base_resp(status.base_resp)?;

            match status.status.as_deref() {
                Some("Success") => {
                    return Ok(VideoResponse {
                        created: chrono::Utc::now().timestamp() as u64,
                        data: vec![VideoData {
                            url: status.video_url,
                            b64_json: None,
                            duration_seconds: request.duration_seconds,
                            resolution: request.resolution.clone(),
                        }],
                        usage: Some(Usage {
                            video_duration_seconds: request.duration_seconds,
                            video_resolution: request.resolution.clone(),
                            ..Default::default()
                        }),
                    });
                }
                Some("Fail") => {
                    return Err(ProviderError::ServiceUnavailable {
                        reason: Some("video generation task failed".to_string()),
                    })
                }
                _ => tokio::time::sleep(VIDEO_POLL_INTERVAL).await,
            }
        }

        Err(ProviderError::Timeout)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        // No public listing endpoint; synthesize the supported families.
        Ok(vec![
            "MiniMax-Text-01".to_string(),
            "speech-02-hd".to_string(),
            "video-01".to_string(),
        ])
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        // A minimal TTS quote probe returns base_resp without billing.
        let probe = TtsRequest {
            model: "speech-02-hd".to_string(),
            text: String::new(),
            voice_setting: VoiceSetting {
                voice_id: "male-qn-qingse".to_string(),
                speed: None,
            },
            audio_setting: None,
        };
        match self.http.post_json::<_, TtsResponse>("/v1/t2a_v2", &probe).await {
            Ok(response) => match check_base_resp(response.base_resp) {
                Ok(()) => Ok(AuthVerification::Ok),
                Err(e) if e.kind() == crate::error::ErrorKind::InvalidApiKey => Ok(
                    AuthVerification::failed("invalid_api_key", Some(e.to_string())),
                ),
                // Parameter complaints still prove the key was accepted.
                Err(_) => Ok(AuthVerification::Ok),
            },
            Err(e) if !e.is_retryable() => Ok(AuthVerification::failed(
                e.kind().machine_code(),
                Some(e.to_string()),
            )),
            Err(e) => Err(e),
        }
    }
}
