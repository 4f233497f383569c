use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use stagecast_core::{
    ChatEvent, ChatMessage, ConnectionState, EventBus, Result, Sender, StagecastError,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::token::ChatToken;

const DELETE_MESSAGE_EVENT: &str = "aws:DELETE_MESSAGE";

/// Connection to a chat room. Implementations report everything they see
/// as `ChatEvent`s on the event bus.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self, token: &ChatToken, region: &str) -> Result<()>;
    async fn send(&self, content: &str) -> Result<()>;
    async fn disconnect(&self);
}

struct Connection {
    outgoing: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// IVS chat messaging over a raw WebSocket.
pub struct IvsChatTransport {
    bus: Arc<EventBus>,
    endpoint_override: Option<String>,
    connection: Mutex<Option<Connection>>,
}

impl IvsChatTransport {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            endpoint_override: None,
            connection: Mutex::new(None),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    pub fn endpoint_for(&self, region: &str) -> String {
        match &self.endpoint_override {
            Some(endpoint) => endpoint.clone(),
            None => format!("wss://edge.ivschat.{region}.amazonaws.com"),
        }
    }
}

#[async_trait]
impl ChatTransport for IvsChatTransport {
    async fn connect(&self, token: &ChatToken, region: &str) -> Result<()> {
        self.disconnect().await;

        let endpoint = self.endpoint_for(region);
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| StagecastError::Transport(format!("Invalid chat endpoint: {e}")))?;
        let protocol = HeaderValue::from_str(&token.token)
            .map_err(|e| StagecastError::Transport(format!("Invalid chat token: {e}")))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| StagecastError::Transport(format!("Chat connection failed: {e}")))?;
        tracing::info!("Connected to chat at {endpoint}");

        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut queued) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = queued.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!("Chat write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let bus = self.bus.clone();
        let reader = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                let text = match next {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        publish(&bus, ChatEvent::Error(e.to_string()));
                        break;
                    }
                };
                match decode_frame(&text) {
                    Some(event) => publish(&bus, event),
                    None => tracing::debug!("Ignoring chat frame: {text}"),
                }
            }
            publish(&bus, ChatEvent::State(ConnectionState::Disconnected));
        });

        *self.connection.lock().await = Some(Connection {
            outgoing,
            reader,
            writer,
        });
        publish(&self.bus, ChatEvent::State(ConnectionState::Connected));
        Ok(())
    }

    async fn send(&self, content: &str) -> Result<()> {
        let guard = self.connection.lock().await;
        let connection = guard
            .as_ref()
            .ok_or_else(|| StagecastError::Transport("Chat room not connected".into()))?;
        let frame = send_message_frame(content, &uuid::Uuid::new_v4().to_string());
        connection
            .outgoing
            .send(Message::Text(frame))
            .map_err(|_| StagecastError::Transport("Chat connection closed".into()))
    }

    async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };
        let _ = connection.outgoing.send(Message::Close(None));
        drop(connection.outgoing);
        connection.reader.abort();
        if connection.writer.await.is_err() {
            tracing::debug!("Chat writer ended abnormally");
        }
        tracing::info!("Disconnected from chat");
    }
}

fn publish(bus: &EventBus, event: ChatEvent) {
    if let Err(e) = bus.broadcast(event) {
        tracing::debug!("{e}");
    }
}

pub fn send_message_frame(content: &str, request_id: &str) -> String {
    serde_json::json!({
        "Action": "SEND_MESSAGE",
        "RequestId": request_id,
        "Content": content,
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Frame {
    #[serde(rename = "Type")]
    kind: String,
    id: Option<String>,
    content: Option<String>,
    sender: Option<FrameSender>,
    send_time: Option<DateTime<Utc>>,
    event_name: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FrameSender {
    user_id: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// Maps one inbound chat frame to an event. Frames we have no use for
/// yield `None`.
pub fn decode_frame(text: &str) -> Option<ChatEvent> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Undecodable chat frame: {e}");
            return None;
        }
    };

    match frame.kind.as_str() {
        "MESSAGE" => {
            let id = frame.id?;
            let sender = frame
                .sender
                .map(|s| Sender {
                    user_id: s.user_id,
                    attributes: s.attributes,
                })
                .unwrap_or_else(|| Sender::new(""));
            Some(ChatEvent::Message(ChatMessage {
                id,
                content: frame.content.unwrap_or_default(),
                sender,
                send_time: frame.send_time.unwrap_or_else(Utc::now),
            }))
        }
        "EVENT" if frame.event_name.as_deref() == Some(DELETE_MESSAGE_EVENT) => frame
            .attributes
            .get("MessageID")
            .cloned()
            .map(ChatEvent::MessageDelete),
        "ERROR" => Some(ChatEvent::Error(
            frame
                .error_message
                .unwrap_or_else(|| "Unknown error occurred".into()),
        )),
        _ => None,
    }
}
