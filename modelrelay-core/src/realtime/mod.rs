//! # Realtime Audio Session Core
//!
//! Bidirectional audio/text sessions over a persistent WebSocket-class
//! transport. The canonical duplex event vocabulary lives here; each
//! provider supplies a [`translator::RealtimeTranslator`] that maps it
//! onto its wire protocol, and [`session::RealtimeSession`] owns the
//! transport, the state machine, and the frame pumps.
//!
//! State machine: `Connecting → Connected → Closing → Closed`, with
//! `Closed` the single terminal state. Sends are serialized per
//! session; receives are delivered in upstream order. A receive-loop
//! failure yields exactly one synthesized error frame before the
//! session closes: errors are never silently dropped.

pub mod elevenlabs;
pub mod openai;
pub mod session;
pub mod translator;

pub use session::RealtimeSession;
pub use translator::{RealtimeTranslator, ValidationReport};

use serde::{Deserialize, Serialize};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connecting, SessionState::Connected)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Connected, SessionState::Closing)
                | (SessionState::Connected, SessionState::Closed)
                | (SessionState::Closing, SessionState::Closed)
        )
    }
}

/// Configuration for opening a realtime session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// e.g. `"pcm16"`, `"g711_ulaw"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Canonical frames the caller sends into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Raw audio bytes to append to the input buffer
    AudioAppend { audio: Vec<u8> },
    /// Out-of-band text input
    TextInput { text: String },
    /// Result of a function call the model requested
    FunctionResponse { call_id: String, output: String },
    /// Ask the model to produce a response now
    ResponseRequest {
        instructions: Option<String>,
        temperature: Option<f32>,
    },
    /// Patch the live session configuration
    SessionUpdate { patch: serde_json::Value },
}

/// Severity attached to canonical error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
}

/// Canonical frames a session yields to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    AudioDelta { audio: Vec<u8>, is_final: bool },
    TextDelta { text: String },
    FunctionCallDelta {
        call_id: String,
        name: Option<String>,
        arguments_delta: String,
        is_final: bool,
    },
    /// Provider lifecycle notices (speech started, response done, ...)
    Status { kind: String, detail: Option<String> },
    Error {
        code: String,
        message: String,
        severity: ErrorSeverity,
        terminal: bool,
    },
}
