//! Shared HTTP plumbing for provider adapters.
//!
//! Wraps a `reqwest::Client` with base-url resolution, default headers,
//! an auth strategy, and the canonical error mapping from upstream
//! status codes, including `Retry-After` extraction and rate-limit
//! detail headers.

use crate::error::{ProviderError, RateLimitDetail};
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    None,
}

#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Option<Duration>,
        base_url: Option<String>,
        default_base: &str,
        headers: &HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self, ProviderError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| ProviderError::Configuration {
            message: format!("Failed to create HTTP client: {e}"),
        })?;

        let mut default_headers = HeaderMap::new();

        match auth {
            AuthStrategy::Bearer { token } => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    default_headers.insert("Authorization", value);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<reqwest::header::HeaderName>(), value.parse())
                {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::None => {}
        }

        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (k.parse::<reqwest::header::HeaderName>(), v.parse()) {
                default_headers.insert(name, value);
            }
        }

        let base_url = base_url.unwrap_or_else(|| default_base.to_string());

        Ok(Self {
            http,
            base_url,
            default_headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    fn build_headers(&self) -> HeaderMap {
        self.default_headers.clone()
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, ProviderError> {
        let resp = self.post_json_raw(path, body).await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        decode_json(resp).await
    }

    pub async fn post_json_raw<TReq: Serialize>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<Response, ProviderError> {
        let url = self.build_url(path);
        let resp = self
            .http
            .request(Method::POST, url)
            .headers(self.build_headers())
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<Response, ProviderError> {
        let url = self.build_url(path);
        let resp = self
            .http
            .request(Method::POST, url)
            .headers(self.build_headers())
            .multipart(form)
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn get_json<TResp: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<TResp, ProviderError> {
        let url = self.build_url(path);
        let resp = self
            .http
            .request(Method::GET, url)
            .headers(self.build_headers())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        decode_json(resp).await
    }

    /// POST a pre-built request with extra per-call headers; used by
    /// adapters that sign each request individually.
    pub async fn post_signed(
        &self,
        path: &str,
        body: Vec<u8>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Response, ProviderError> {
        let url = self.build_url(path);
        let mut headers = self.build_headers();
        for (k, v) in extra_headers {
            if let (Ok(name), Ok(value)) = (k.parse::<reqwest::header::HeaderName>(), v.parse()) {
                headers.insert(name, value);
            }
        }
        let resp = self
            .http
            .request(Method::POST, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Ok(resp)
    }
}

/// Decode a success body, mapping parse failures to `Protocol`.
pub async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, ProviderError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Protocol {
        message: format!("malformed provider response: {e}"),
    })
}

/// Map a non-success upstream response onto the error taxonomy.
///
/// Pulls a human-readable message from the common JSON error shapes,
/// honors `Retry-After`, and carries rate-limit detail headers when the
/// provider sets them.
pub async fn map_error_response(resp: Response) -> ProviderError {
    let status = resp.status().as_u16();
    let retry_after = parse_retry_after(resp.headers());
    let detail = parse_rate_limit_detail(resp.headers());

    let message = match resp.text().await {
        Ok(body) => extract_error_message(&body),
        Err(_) => "Failed to read error response".to_string(),
    };

    match ProviderError::from_status(status, message, retry_after) {
        ProviderError::RateLimit { retry_after, .. } => ProviderError::RateLimit {
            retry_after,
            detail,
        },
        other => other,
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| v.get("message"))
                .or_else(|| v.get("detail"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.to_string())
}

/// Parse `Retry-After` as delay-seconds. HTTP-date values are ignored;
/// the backoff schedule covers that case.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_rate_limit_detail(headers: &HeaderMap) -> RateLimitDetail {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    RateLimitDetail {
        limit: header_str("x-ratelimit-limit").and_then(|v| v.parse().ok()),
        window: header_str("x-ratelimit-window"),
        limit_type: header_str("x-ratelimit-type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpProviderClient {
        HttpProviderClient::new(
            Some(Duration::from_secs(5)),
            Some(server.uri()),
            "https://unused.example",
            &HashMap::new(),
            AuthStrategy::Bearer {
                token: "test".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn maps_rate_limit_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .insert_header("x-ratelimit-limit", "100")
                    .set_body_json(serde_json::json!({
                        "error": {"message": "rate limited"}
                    })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .post_json::<_, serde_json::Value>("/v1/chat", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        match err {
            ProviderError::RateLimit { detail, .. } => assert_eq!(detail.limit, Some(100)),
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_auth_and_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/unauthorized"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/down"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_json(serde_json::json!({"message": "maintenance"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;

        let err = client
            .get_json::<serde_json::Value>("/v1/unauthorized")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidApiKey);

        let err = client
            .get_json::<serde_json::Value>("/v1/down")
            .await
            .unwrap_err();
        match err {
            ProviderError::ServiceUnavailable { reason } => {
                assert_eq!(reason.as_deref(), Some("maintenance"))
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_success_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_json::<serde_json::Value>("/v1/broken")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn url_building_handles_slashes() {
        let client = HttpProviderClient::new(
            None,
            Some("https://api.example.com/".into()),
            "https://default.example",
            &HashMap::new(),
            AuthStrategy::None,
        )
        .unwrap();
        assert_eq!(
            client.build_url("/v1/chat"),
            "https://api.example.com/v1/chat"
        );
        assert_eq!(client.build_url("v1/chat"), "https://api.example.com/v1/chat");
    }
}
