//! Socket transport
//!
//! The server's RPC rides a websocket exchanging `[name, payload]` JSON
//! text frames. The session controller never touches the socket: it
//! consumes a `ServerEvent` stream and writes through a `MessageSender`,
//! so tests can drive it with bare channels.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::BotError;
use crate::protocol::{ServerEvent, ServerMessage};

pub struct Transport {
    pub events: mpsc::Receiver<ServerEvent>,
    pub outbound: MessageSender,
}

#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl MessageSender {
    pub fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            warn!("socket writer is gone, dropping outbound message");
        }
    }
}

impl Transport {
    /// A transport backed by bare channels: the caller feeds events and
    /// drains outbound messages. This is what `connect` builds on and what
    /// tests use directly.
    pub fn channel(
        buffer: usize,
    ) -> (
        Transport,
        mpsc::Sender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        let (event_tx, events) = mpsc::channel(buffer);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Transport {
                events,
                outbound: MessageSender { tx: out_tx },
            },
            event_tx,
            out_rx,
        )
    }
}

/// Connect the websocket and start the pump tasks.
pub async fn connect(url: &str) -> Result<Transport, BotError> {
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| BotError::Socket(format!("{url}: {e}")))?;
    let (mut sink, mut stream) = socket.split();
    let (transport, event_tx, mut out_rx) = Transport::channel(64);

    event_tx
        .send(ServerEvent::Connected)
        .await
        .map_err(|_| BotError::Socket("event channel closed".into()))?;

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let frame = serde_json::json!([message.name(), message.payload()]);
            if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                warn!(error = %e, "socket write failed");
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(event) = decode_frame(&text) {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = event_tx.send(ServerEvent::Disconnected).await;
    });

    Ok(transport)
}

fn decode_frame(text: &str) -> Option<ServerEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "undecodable socket frame");
            return None;
        }
    };
    let name = value.get(0)?.as_str()?;
    let payload = value.get(1).cloned().unwrap_or(Value::Null);
    decode_event(name, payload)
}

fn decode_event(name: &str, payload: Value) -> Option<ServerEvent> {
    match name {
        "authenticate" | "authenticated" => Some(ServerEvent::Authenticated {
            id: payload.get("id").and_then(Value::as_i64),
            username: payload
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        "active_game" => match serde_json::from_value(payload) {
            Ok(game) => Some(ServerEvent::ActiveGame(game)),
            Err(e) => {
                warn!(error = %e, "bad active_game payload");
                None
            }
        },
        "notification" => match serde_json::from_value(payload) {
            Ok(notification) => Some(ServerEvent::Notification(notification)),
            Err(e) => {
                warn!(error = %e, "bad notification payload");
                None
            }
        },
        other => {
            debug!(event = other, "ignoring socket event");
            None
        }
    }
}
