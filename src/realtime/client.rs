//! WebSocket link to the Gemini Live service
//!
//! `connect` performs the whole handshake (socket, `setup`, `setupComplete`)
//! and only then hands back a [`RealtimeLink`]. After that a single IO task
//! owns the socket: outbound items arrive on an mpsc channel, server frames
//! are parsed into [`ServerEvent`]s and forwarded in arrival order.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, Outbound, ServerEvent, ServerMessage};
use crate::session::config::ApiKey;

/// Default Gemini Live endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);
const LINK_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("session setup rejected: {0}")]
    SetupRejected(String),

    #[error("no setup acknowledgement within {0:?}")]
    SetupTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("outbound queue full")]
    Backpressure,

    #[error("link closed")]
    Closed,
}

/// Session parameters announced in the `setup` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSessionConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub transcribe: bool,
}

impl LiveSessionConfig {
    pub fn setup_message(&self) -> ClientMessage {
        ClientMessage::setup(
            &self.model,
            &self.voice,
            self.system_instruction.as_deref(),
            self.transcribe,
        )
    }
}

/// Sending half of an open link
///
/// Sends never wait: a full queue is reported as `Backpressure` and the
/// caller decides whether the item is worth keeping.
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<Outbound>,
}

impl LinkSender {
    pub fn try_send(&self, item: Outbound) -> Result<(), RealtimeError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RealtimeError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => RealtimeError::Closed,
        })
    }

    /// Ask the IO task to close the socket. Closing twice is a no-op.
    pub fn close(&self) {
        if self.tx.try_send(Outbound::Close).is_err() {
            debug!("Link already closed or busy, dropping sender closes it");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An established remote session
pub struct RealtimeLink {
    sender: LinkSender,
    events: mpsc::Receiver<ServerEvent>,
}

impl RealtimeLink {
    pub fn new(outbound: mpsc::Sender<Outbound>, events: mpsc::Receiver<ServerEvent>) -> Self {
        Self {
            sender: LinkSender { tx: outbound },
            events,
        }
    }

    pub fn into_parts(self) -> (LinkSender, mpsc::Receiver<ServerEvent>) {
        (self.sender, self.events)
    }
}

/// Establishes remote sessions
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a session and wait until the service acknowledged the setup
    async fn connect(
        &self,
        api_key: &ApiKey,
        config: &LiveSessionConfig,
    ) -> Result<RealtimeLink, RealtimeError>;

    fn name(&self) -> &str;
}

pub struct GeminiLiveTransport {
    endpoint: String,
    setup_timeout: Duration,
}

impl Default for GeminiLiveTransport {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_SETUP_TIMEOUT)
    }
}

impl GeminiLiveTransport {
    pub fn new(endpoint: impl Into<String>, setup_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            setup_timeout,
        }
    }

    fn build_ws_url(&self, api_key: &ApiKey) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, api_key.expose())
    }
}

/// Strip the key from anything that might echo the request URL
fn redact(message: String, api_key: &ApiKey) -> String {
    message.replace(api_key.expose(), "***")
}

fn close_reason(frame: Option<&CloseFrame>) -> (bool, String) {
    match frame {
        None => (true, "connection closed".to_string()),
        Some(frame) => {
            let graceful = matches!(frame.code, CloseCode::Normal | CloseCode::Away);
            let reason = if frame.reason.is_empty() {
                format!("closed with code {}", u16::from(frame.code))
            } else {
                frame.reason.to_string()
            };
            (graceful, reason)
        }
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for GeminiLiveTransport {
    async fn connect(
        &self,
        api_key: &ApiKey,
        config: &LiveSessionConfig,
    ) -> Result<RealtimeLink, RealtimeError> {
        let url = self.build_ws_url(api_key);
        info!("Connecting to realtime model {} (voice {})", config.model, config.voice);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(redact(e.to_string(), api_key)))?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let setup = serde_json::to_string(&config.setup_message())
            .map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(redact(e.to_string(), api_key)))?;

        let handshake = async {
            while let Some(msg) = ws_stream.next().await {
                let payload = match msg {
                    Ok(Message::Text(text)) => text.as_bytes().to_vec(),
                    Ok(Message::Binary(data)) => data.to_vec(),
                    Ok(Message::Close(frame)) => {
                        let (_, reason) = close_reason(frame.as_ref());
                        return Err(RealtimeError::SetupRejected(reason));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(RealtimeError::ConnectionFailed(redact(
                            e.to_string(),
                            api_key,
                        )))
                    }
                };

                match ServerMessage::parse(&payload) {
                    Ok(msg) if msg.is_setup_complete() => return Ok(()),
                    Ok(_) => debug!("Ignoring message received before setupComplete"),
                    Err(e) => warn!("Unparseable message during setup: {}", e),
                }
            }

            Err(RealtimeError::SetupRejected(
                "connection ended before setup completed".to_string(),
            ))
        };

        tokio::time::timeout(self.setup_timeout, handshake)
            .await
            .map_err(|_| RealtimeError::SetupTimeout(self.setup_timeout))??;

        info!("Realtime session established");

        let (out_tx, out_rx) = mpsc::channel::<Outbound>(LINK_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(LINK_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            run_link(ws_sink, ws_stream, out_rx, event_tx).await;
        });

        Ok(RealtimeLink::new(out_tx, event_rx))
    }

    fn name(&self) -> &str {
        "gemini-live"
    }
}

async fn run_link<S, R>(
    mut ws_sink: S,
    mut ws_stream: R,
    mut out_rx: mpsc::Receiver<Outbound>,
    event_tx: mpsc::Sender<ServerEvent>,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let item = match outbound {
                    Some(Outbound::Close) | None => {
                        debug!("Closing realtime link");
                        if let Err(e) = ws_sink.send(Message::Close(None)).await {
                            debug!("Close frame not sent: {}", e);
                        }
                        break;
                    }
                    Some(item) => item,
                };

                let Some(message) = ClientMessage::from_outbound(&item) else {
                    continue;
                };

                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize outbound message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    error!("Failed to send on realtime link: {}", e);
                    let _ = event_tx.send(ServerEvent::TransportError(e.to_string())).await;
                    break;
                }
            }

            incoming = ws_stream.next() => {
                let payload = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (graceful, reason) = close_reason(frame.as_ref());
                        info!("Realtime link closed by server: {}", reason);
                        let event = if graceful {
                            ServerEvent::Closed { reason }
                        } else {
                            ServerEvent::TransportError(reason)
                        };
                        let _ = event_tx.send(event).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Realtime link error: {}", e);
                        let _ = event_tx.send(ServerEvent::TransportError(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = event_tx
                            .send(ServerEvent::Closed {
                                reason: "connection ended".to_string(),
                            })
                            .await;
                        break;
                    }
                };

                let message = match ServerMessage::parse(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping unparseable server message: {}", e);
                        continue;
                    }
                };

                for event in message.into_events() {
                    if event_tx.send(event).await.is_err() {
                        debug!("Event consumer detached, ending realtime link");
                        return;
                    }
                }
            }
        }
    }

    debug!("Realtime link task ended");
}
