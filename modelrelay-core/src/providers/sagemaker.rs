//! AWS SageMaker provider adapter.
//!
//! Invokes hosted model endpoints at
//! `POST /endpoints/{name}/invocations`, signing every request with AWS
//! Signature V4 (service `sagemaker`, region from the credential). The
//! deployment's provider model id doubles as the SageMaker endpoint
//! name. Hosted LLM containers rarely report token usage, so responses
//! are synthesized from text length.

use crate::error::ProviderError;
use crate::models::{
    Capability, CapabilityMask, ChatRequest, ChatResponse, Choice, Message, Role, Usage,
};
use crate::providers::{AuthVerification, Provider, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};

const SERVICE: &str = "sagemaker";

pub struct SageMakerProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
    region: String,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct InvocationRequest {
    inputs: String,
    parameters: InvocationParameters,
}

#[derive(Debug, Serialize)]
struct InvocationParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InvocationResponse {
    Many(Vec<GeneratedText>),
    One(GeneratedText),
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

impl SageMakerProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let region = config
            .credential
            .region
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "sagemaker credential requires a region".to_string(),
            })?;
        let secret_key = config
            .credential
            .secondary_secret
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "sagemaker credential requires a secret access key".to_string(),
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://runtime.sagemaker.{region}.amazonaws.com"));

        let mut headers = config.headers.clone();
        headers.insert("User-Agent".to_string(), config.user_agent.clone());

        let http = HttpProviderClient::new(
            config.timeout,
            Some(base_url.clone()),
            &base_url,
            &headers,
            AuthStrategy::None,
        )?;

        Ok(Self {
            http,
            config,
            region,
            secret_key,
            base_url,
        })
    }

    /// Chat-ML flattened into the single prompt string hosted
    /// text-generation containers expect.
    fn flatten_messages(messages: &[Message]) -> String {
        let mut prompt = String::new();
        for msg in messages {
            let tag = match msg.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            prompt.push_str(tag);
            prompt.push_str(": ");
            prompt.push_str(&msg.content);
            prompt.push('\n');
        }
        prompt.push_str("Assistant:");
        prompt
    }

    fn signed_headers_for(
        &self,
        path: &str,
        payload: &[u8],
    ) -> Result<Vec<(String, String)>, ProviderError> {
        let host = sigv4::host_of(&self.base_url).ok_or_else(|| ProviderError::Configuration {
            message: format!("cannot extract host from {}", self.base_url),
        })?;
        let now = chrono::Utc::now();
        let signing = sigv4::SigningParams {
            access_key: &self.config.credential.api_key,
            secret_key: &self.secret_key,
            region: &self.region,
            service: SERVICE,
            timestamp: now,
        };
        let headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("host".to_string(), host),
        ];
        Ok(sigv4::sign("POST", path, &headers, payload, &signing))
    }
}

#[async_trait::async_trait]
impl Provider for SageMakerProvider {
    fn name(&self) -> &str {
        "sagemaker"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::SageMaker
    }

    fn capabilities(&self) -> CapabilityMask {
        CapabilityMask::of(&[Capability::Chat, Capability::TextGeneration])
    }

    fn default_base_url(&self) -> &'static str {
        "https://runtime.sagemaker.us-east-1.amazonaws.com"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let endpoint = self.config.map_model(&request.model);
        let path = format!("/endpoints/{endpoint}/invocations");
        let prompt = Self::flatten_messages(&request.messages);

        let invocation = InvocationRequest {
            inputs: prompt.clone(),
            parameters: InvocationParameters {
                max_new_tokens: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
            },
        };
        let payload = serde_json::to_vec(&invocation)?;
        let headers = self.signed_headers_for(&path, &payload)?;

        let response = self.http.post_signed(&path, payload, headers).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let parsed: InvocationResponse = super::http_client::decode_json(response).await?;
        let generated = match parsed {
            InvocationResponse::Many(mut v) if !v.is_empty() => v.remove(0).generated_text,
            InvocationResponse::One(one) => one.generated_text,
            InvocationResponse::Many(_) => {
                return Err(ProviderError::Protocol {
                    message: "endpoint returned an empty generation list".to_string(),
                })
            }
        };

        Ok(ChatResponse {
            id: format!("sagemaker-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: request.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(generated.clone()),
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: Some(Usage::estimated_from_text(&prompt, &generated)),
            system_fingerprint: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        // The runtime endpoint has no listing API; the deployment's
        // endpoint name is the only model this client serves.
        Ok(self
            .config
            .model_mapping
            .values()
            .cloned()
            .collect::<Vec<_>>())
    }

    async fn verify_auth(&self) -> Result<AuthVerification, ProviderError> {
        // An unsigned-body invocation against a nonexistent endpoint
        // still exercises the signature: a 403 means bad credentials,
        // while a 404 proves the signature was accepted.
        let path = "/endpoints/modelrelay-auth-probe/invocations";
        let payload = b"{}".to_vec();
        let headers = self.signed_headers_for(path, &payload)?;

        let response = self.http.post_signed(path, payload, headers).await?;
        match response.status().as_u16() {
            403 => Ok(AuthVerification::failed(
                "access_forbidden",
                Some("signature rejected".to_string()),
            )),
            401 => Ok(AuthVerification::failed("invalid_api_key", None)),
            _ => Ok(AuthVerification::Ok),
        }
    }
}

/// AWS Signature Version 4 request signing.
pub(crate) mod sigv4 {
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};

    type HmacSha256 = Hmac<Sha256>;

    pub struct SigningParams<'a> {
        pub access_key: &'a str,
        pub secret_key: &'a str,
        pub region: &'a str,
        pub service: &'a str,
        pub timestamp: chrono::DateTime<chrono::Utc>,
    }

    pub fn host_of(url: &str) -> Option<String> {
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        let host = rest.split('/').next()?;
        (!host.is_empty()).then(|| host.to_string())
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn sha256_hex(data: &[u8]) -> String {
        to_hex(&Sha256::digest(data))
    }

    fn to_hex(bytes: &[u8]) -> String {
        use std::fmt::Write as _;
        bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
    }

    /// Sign a request and return the headers to attach: the signed
    /// headers themselves (minus `host`, which the HTTP client sets),
    /// `x-amz-date`, and `authorization`.
    ///
    /// `headers` must carry lowercase names; `host` must be present.
    pub fn sign(
        method: &str,
        path: &str,
        headers: &[(String, String)],
        payload: &[u8],
        params: &SigningParams<'_>,
    ) -> Vec<(String, String)> {
        let amz_date = params.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let date = params.timestamp.format("%Y%m%d").to_string();

        let mut all_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        all_headers.push(("x-amz-date".to_string(), amz_date.clone()));
        all_headers.sort();

        let canonical_headers: String = all_headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();
        let signed_header_names = all_headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let payload_hash = sha256_hex(payload);
        let canonical_request = format!(
            "{method}\n{path}\n\n{canonical_headers}\n{signed_header_names}\n{payload_hash}"
        );

        let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac(
            format!("AWS4{}", params.secret_key).as_bytes(),
            date.as_bytes(),
        );
        let k_region = hmac(&k_date, params.region.as_bytes());
        let k_service = hmac(&k_region, params.service.as_bytes());
        let k_signing = hmac(&k_service, b"aws4_request");
        let signature = to_hex(&hmac(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_header_names}, Signature={signature}",
            params.access_key
        );

        let mut out: Vec<(String, String)> = headers
            .iter()
            .filter(|(k, _)| k != "host")
            .cloned()
            .collect();
        out.push(("x-amz-date".to_string(), amz_date));
        out.push(("authorization".to_string(), authorization));
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::TimeZone;

        /// The `get-vanilla` case from the AWS SigV4 test suite.
        #[test]
        fn matches_aws_test_suite_vector() {
            let params = SigningParams {
                access_key: "AKIDEXAMPLE",
                secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                region: "us-east-1",
                service: "service",
                timestamp: chrono::Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap(),
            };
            let headers = vec![("host".to_string(), "example.amazonaws.com".to_string())];
            let signed = sign("GET", "/", &headers, b"", &params);

            let authorization = signed
                .iter()
                .find(|(k, _)| k == "authorization")
                .map(|(_, v)| v.clone())
                .unwrap();
            assert!(authorization.contains(
                "Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request"
            ));
            assert!(authorization.contains("SignedHeaders=host;x-amz-date"));
            assert!(authorization.ends_with(
                "Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
            ));
        }

        #[test]
        fn host_extraction() {
            assert_eq!(
                host_of("https://runtime.sagemaker.us-east-1.amazonaws.com/x"),
                Some("runtime.sagemaker.us-east-1.amazonaws.com".to_string())
            );
            assert_eq!(
                host_of("http://localhost:9000"),
                Some("localhost:9000".to_string())
            );
            assert_eq!(host_of("://"), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> SageMakerProvider {
        let mut config = test_support::config(ProviderKind::SageMaker)
            .with_base_url(server.uri())
            .with_model_mapping("llama-endpoint", "llama-endpoint");
        config.credential.secondary_secret = Some("secret".into());
        config.credential.region = Some("us-east-1".into());
        SageMakerProvider::new(config).unwrap()
    }

    #[test]
    fn prompt_flattening_keeps_turn_order() {
        let prompt = SageMakerProvider::flatten_messages(&[
            Message::system("Be brief."),
            Message::user("Ping?"),
        ]);
        assert_eq!(prompt, "System: Be brief.\nUser: Ping?\nAssistant:");
    }

    #[tokio::test]
    async fn invocation_is_signed_and_usage_synthesized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/endpoints/llama-endpoint/invocations"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"generated_text": "Pong."}
            ])))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(ChatRequest {
                model: "llama-endpoint".into(),
                messages: vec![Message::user("Ping?")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.choices[0].message.content, "Pong.");
        let usage = response.usage.unwrap();
        assert!(usage.estimated);
        assert!(usage.prompt_tokens.unwrap() > 0);
    }

    #[test]
    fn missing_region_or_secret_is_a_configuration_error() {
        let config = test_support::config(ProviderKind::SageMaker);
        assert!(SageMakerProvider::new(config).is_err());

        let mut config = test_support::config(ProviderKind::SageMaker);
        config.credential.region = Some("us-east-1".into());
        assert!(SageMakerProvider::new(config).is_err());
    }
}
