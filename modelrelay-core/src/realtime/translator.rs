//! Translator contract for realtime providers.
//!
//! A translator is the only provider-specific piece of the realtime
//! stack: it validates session configuration before any transport
//! opens, describes the handshake (URL, subprotocol, headers), produces
//! the initialization messages, and maps canonical frames to and from
//! wire text.

use super::{ClientFrame, RealtimeConfig, ServerFrame};
use crate::error::ProviderError;

/// Outcome of validating a [`RealtimeConfig`] against a translator's
/// whitelists. Errors block the connection; warnings do not.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }

    /// Collapse into a provider error when invalid.
    pub fn into_result(self) -> Result<Vec<String>, ProviderError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ProviderError::Validation {
                messages: self.errors,
            })
        }
    }
}

/// Per-provider wire adapter for realtime sessions.
pub trait RealtimeTranslator: Send + Sync {
    /// Provider name, for session metadata and logs.
    fn provider(&self) -> &str;

    /// Validate configuration against model/voice/format whitelists.
    fn validate(&self, config: &RealtimeConfig) -> ValidationReport;

    /// WebSocket URL for this configuration.
    fn connect_url(&self, config: &RealtimeConfig) -> String;

    /// Required WebSocket subprotocol, when the provider demands one.
    fn subprotocol(&self) -> Option<&str> {
        None
    }

    /// Extra handshake headers (auth, beta flags).
    fn headers(&self, config: &RealtimeConfig) -> Vec<(String, String)>;

    /// Messages sent immediately after the transport opens, in order.
    fn init_messages(&self, config: &RealtimeConfig) -> Vec<String>;

    /// Encode one canonical client frame as wire text.
    fn encode(&self, frame: &ClientFrame) -> Result<String, ProviderError>;

    /// Decode one wire text message; `None` means the message carries
    /// nothing the canonical vocabulary represents (acks, heartbeats).
    fn decode(&self, raw: &str) -> Result<Option<ServerFrame>, ProviderError>;
}
