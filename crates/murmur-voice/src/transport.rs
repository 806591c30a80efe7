//! WebSocket transport between the engine and the speech server.
//!
//! The session never touches the socket: it sends `OutboundMessage`s and receives
//! `TransportEvent`s over channels, and the reader/writer tasks spawned by
//! [`connect`] do the framing. Reconnect policy belongs to whoever owns the
//! session, not to this module.

use crate::error::{VoiceError, VoiceResult};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// A message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Encoded audio to play.
    Binary(Vec<u8>),
    /// JSON control/transcript message, or plain text.
    Text(String),
}

/// A message sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// First message of every session.
    Config { username: String },
    /// One WAV-encoded utterance.
    Utterance(Vec<u8>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlMessage<'a> {
    Config { username: &'a str },
}

impl OutboundMessage {
    /// Wire form: config as JSON text, utterances as binary frames.
    pub fn to_message(&self) -> VoiceResult<Message> {
        match self {
            OutboundMessage::Config { username } => {
                let json = serde_json::to_string(&ControlMessage::Config { username })
                    .map_err(|e| VoiceError::Transport(format!("config encode failed: {}", e)))?;
                Ok(Message::Text(json))
            }
            OutboundMessage::Utterance(bytes) => Ok(Message::Binary(bytes.clone())),
        }
    }
}

/// What the reader task reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// Connection ended; `reason` is set for errors and close frames that carry one.
    Closed { reason: Option<String> },
}

/// Derive the socket URL from a server base URL: http → ws, https → wss, `/ws` appended.
pub fn websocket_url(base: &str) -> VoiceResult<String> {
    let base = base.trim().trim_end_matches('/');
    let (scheme, rest) = base
        .split_once("://")
        .ok_or_else(|| VoiceError::Config(format!("server URL has no scheme: {}", base)))?;
    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(VoiceError::Config(format!(
                "unsupported server URL scheme: {}",
                other
            )))
        }
    };
    if rest.is_empty() {
        return Err(VoiceError::Config(format!("server URL has no host: {}", base)));
    }
    if rest.ends_with("/ws") {
        Ok(format!("{}://{}", ws_scheme, rest))
    } else {
        Ok(format!("{}://{}/ws", ws_scheme, rest))
    }
}

/// Channel halves of an open connection plus its background tasks.
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl TransportHandle {
    /// Close the socket: the writer sends a close frame once the outbound
    /// channel is dropped; the reader is stopped.
    pub async fn shutdown(self) {
        drop(self.outbound);
        if let Err(e) = self.writer.await {
            debug!("transport writer ended abnormally: {}", e);
        }
        self.reader.abort();
    }
}

/// Connect to `url` (already in `ws://`/`wss://` form).
pub async fn connect(url: &str) -> VoiceResult<TransportHandle> {
    info!(url, "Connecting to server");
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| VoiceError::Transport(format!("Connection failed: {}", e)))?;
    info!("✅ WebSocket connection established");

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

    let writer_events = event_tx.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let frame = match msg.to_message() {
                Ok(f) => f,
                Err(e) => {
                    warn!("Dropping outbound message: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(frame).await {
                warn!("WebSocket send failed: {}", e);
                let _ = writer_events.send(TransportEvent::Closed {
                    reason: Some(e.to_string()),
                });
                return;
            }
        }
        if let Err(e) = write.close().await {
            debug!("WebSocket close failed: {}", e);
        }
    });

    let reader = tokio::spawn(async move {
        let mut reason = None;
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Message(InboundMessage::Text(text)));
                }
                Ok(Message::Binary(bytes)) => {
                    let _ = event_tx.send(TransportEvent::Message(InboundMessage::Binary(bytes)));
                }
                Ok(Message::Close(close)) => {
                    reason = close
                        .map(|c| c.reason.to_string())
                        .filter(|r| !r.is_empty());
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    reason = Some(e.to_string());
                    break;
                }
            }
        }
        info!("WebSocket connection closed");
        let _ = event_tx.send(TransportEvent::Closed { reason });
    });

    Ok(TransportHandle {
        outbound: out_tx,
        inbound: event_rx,
        writer,
        reader,
    })
}
