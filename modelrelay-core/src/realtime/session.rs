//! Realtime session: transport ownership, state machine, frame pumps.
//!
//! A session owns exactly one WebSocket. The caller talks to it through
//! a pair of typed channels: an outbound sender of [`ClientFrame`]s
//! and an inbound receiver of [`ServerFrame`]s: while a driver task
//! pumps both sides of the transport. Outbound frames are serialized by
//! construction (single channel, single driver); inbound frames are
//! yielded in upstream order.
//!
//! Connection sequence: validate configuration against the translator,
//! open the transport with the required subprotocol and headers, send
//! the translator's initialization messages, then transition to
//! Connected. Cancellation aborts the receive loop and runs a
//! normal-closure handshake bounded by the close deadline before the
//! handle is dropped.

use super::translator::RealtimeTranslator;
use super::{ClientFrame, ErrorSeverity, RealtimeConfig, ServerFrame, SessionState};
use crate::error::ProviderError;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CLOSE_DEADLINE: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 64;

/// A live realtime session.
///
/// Dropping the session cancels it: the outbound channel closes, which
/// makes the driver run the close handshake and release the transport.
#[derive(Debug)]
pub struct RealtimeSession {
    id: Uuid,
    provider: String,
    outbound: mpsc::Sender<ClientFrame>,
    inbound: Mutex<mpsc::Receiver<ServerFrame>>,
    state: watch::Receiver<SessionState>,
    cancel: watch::Sender<bool>,
    /// Non-blocking validation findings from the translator
    warnings: Vec<String>,
}

impl RealtimeSession {
    /// Open a session with the default close deadline.
    pub async fn connect(
        translator: Arc<dyn RealtimeTranslator>,
        config: RealtimeConfig,
    ) -> Result<Self, ProviderError> {
        Self::connect_with_deadline(translator, config, DEFAULT_CLOSE_DEADLINE).await
    }

    /// Open a session, bounding the eventual close handshake by
    /// `close_deadline`.
    pub async fn connect_with_deadline(
        translator: Arc<dyn RealtimeTranslator>,
        config: RealtimeConfig,
        close_deadline: Duration,
    ) -> Result<Self, ProviderError> {
        // Validation gates the transport: nothing is opened for a
        // configuration the translator rejects.
        let warnings = translator.validate(&config).into_result()?;

        let url = translator.connect_url(&config);
        let mut request =
            url.clone()
                .into_client_request()
                .map_err(|e| ProviderError::Configuration {
                    message: format!("invalid realtime url {url}: {e}"),
                })?;
        for (name, value) in translator.headers(&config) {
            if let (Ok(name), Ok(value)) = (
                name.parse::<tokio_tungstenite::tungstenite::http::header::HeaderName>(),
                value.parse(),
            ) {
                request.headers_mut().insert(name, value);
            }
        }
        if let Some(subprotocol) = translator.subprotocol() {
            if let Ok(value) = subprotocol.parse() {
                request
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (mut transport, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                let _ = state_tx.send(SessionState::Closed);
                ProviderError::Network {
                    message: format!("realtime connect failed: {e}"),
                }
            })?;

        for init in translator.init_messages(&config) {
            transport
                .send(Message::Text(init.into()))
                .await
                .map_err(|e| ProviderError::Network {
                    message: format!("realtime initialization failed: {e}"),
                })?;
        }

        transition(&state_tx, SessionState::Connected);

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let id = Uuid::new_v4();
        let provider = translator.provider().to_string();
        tokio::spawn(drive(
            id,
            transport,
            translator,
            outbound_rx,
            inbound_tx,
            state_tx,
            cancel_rx,
            close_deadline,
        ));

        Ok(Self {
            id,
            provider,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            state: state_rx,
            cancel: cancel_tx,
            warnings,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch handle for observing state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Send one canonical frame. Frames are serialized per session.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), ProviderError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ProviderError::Configuration {
                message: "realtime session is closed".to_string(),
            })
    }

    /// Receive the next canonical frame; `None` means the session has
    /// ended and no further frames will arrive.
    pub async fn recv(&self) -> Option<ServerFrame> {
        self.inbound.lock().await.recv().await
    }

    /// Request cancellation: the receive loop stops and a bounded
    /// normal-closure handshake runs on the transport.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait until the session reaches Closed.
    pub async fn close(&self) {
        self.cancel();
        let mut watch = self.state.clone();
        while *watch.borrow() != SessionState::Closed {
            if watch.changed().await.is_err() {
                break;
            }
        }
    }
}

fn transition(state: &watch::Sender<SessionState>, next: SessionState) {
    let current = *state.borrow();
    if current.can_transition_to(next) {
        let _ = state.send(next);
    } else if current != next {
        tracing::debug!(?current, ?next, "suppressing illegal session transition");
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    id: Uuid,
    mut transport: Transport,
    translator: Arc<dyn RealtimeTranslator>,
    mut outbound: mpsc::Receiver<ClientFrame>,
    inbound: mpsc::Sender<ServerFrame>,
    state: watch::Sender<SessionState>,
    mut cancel: watch::Receiver<bool>,
    close_deadline: Duration,
) {
    let mut graceful = false;

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    graceful = true;
                    break;
                }
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let encoded = match translator.encode(&frame) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            // Unencodable frames are reported, not fatal.
                            let _ = inbound.send(ServerFrame::Error {
                                code: "encode_failed".to_string(),
                                message: e.to_string(),
                                severity: ErrorSeverity::Warning,
                                terminal: false,
                            }).await;
                            continue;
                        }
                    };
                    if let Err(e) = transport.send(Message::Text(encoded.into())).await {
                        let _ = inbound.send(ServerFrame::Error {
                            code: "transport_send_failed".to_string(),
                            message: e.to_string(),
                            severity: ErrorSeverity::Fatal,
                            terminal: true,
                        }).await;
                        transition(&state, SessionState::Closed);
                        return;
                    }
                }
                // Outbound completion is the end-of-stream signal.
                None => {
                    graceful = true;
                    break;
                }
            },
            message = transport.next() => match message {
                Some(Ok(Message::Text(text))) => match translator.decode(&text) {
                    Ok(Some(frame)) => {
                        if inbound.send(frame).await.is_err() {
                            // Consumer is gone; close out politely.
                            graceful = true;
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = inbound.send(ServerFrame::Error {
                            code: "decode_failed".to_string(),
                            message: e.to_string(),
                            severity: ErrorSeverity::Fatal,
                            terminal: true,
                        }).await;
                        transition(&state, SessionState::Closed);
                        return;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(session = %id, "upstream closed realtime session");
                    transition(&state, SessionState::Closed);
                    return;
                }
                // tungstenite answers pings internally.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(ServerFrame::Error {
                        code: "transport_error".to_string(),
                        message: e.to_string(),
                        severity: ErrorSeverity::Fatal,
                        terminal: true,
                    }).await;
                    transition(&state, SessionState::Closed);
                    return;
                }
            },
        }
    }

    if graceful {
        transition(&state, SessionState::Closing);
        let handshake = async {
            let _ = transport.send(Message::Close(None)).await;
            // Drain until the peer acknowledges or hangs up.
            while let Some(message) = transport.next().await {
                match message {
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        };
        if tokio::time::timeout(close_deadline, handshake).await.is_err() {
            tracing::debug!(session = %id, "close handshake exceeded deadline, forcing shutdown");
        }
        transition(&state, SessionState::Closed);
    }
}
