use std::sync::Arc;

use parking_lot::Mutex;
use stagecast_core::{
    ChatEvent, ConnectionState, EventBus, MessageStoreHandle, Result, StagecastError,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::token::{TokenProvider, TokenRequest};
use crate::transport::ChatTransport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub chat_room_arn: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

/// Region segment of an IVS chat room ARN
/// (`arn:aws:ivschat:<region>:<account>:room/<id>`).
pub fn region_from_arn(arn: &str) -> Result<&str> {
    let mut fields = arn.split(':');
    if fields.next() != Some("arn") {
        return Err(StagecastError::Validation(format!("Invalid chat room ARN: {arn}")));
    }
    match fields.nth(2) {
        Some(region) if !region.is_empty() => Ok(region),
        _ => Err(StagecastError::Validation(format!("Invalid chat room ARN: {arn}"))),
    }
}

/// One viewer's membership in a chat room. Owns the path from transport
/// events to the shared message store.
pub struct ChatSession {
    store: MessageStoreHandle,
    bus: Arc<EventBus>,
    tokens: Option<Arc<dyn TokenProvider>>,
    transport: Arc<dyn ChatTransport>,
    state: Arc<watch::Sender<ConnectionState>>,
    error: Arc<watch::Sender<Option<String>>>,
    ingest: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    pub fn new(
        store: MessageStoreHandle,
        bus: Arc<EventBus>,
        tokens: Option<Arc<dyn TokenProvider>>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (error, _) = watch::channel(None);
        Self {
            store,
            bus,
            tokens,
            transport,
            state: Arc::new(state),
            error: Arc::new(error),
            ingest: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub async fn connect(&self, request: &ConnectRequest) -> Result<()> {
        let user_id = request
            .user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| StagecastError::Validation("A user id is required to join chat".into()))?;
        let tokens = self.tokens.as_ref().ok_or_else(|| {
            StagecastError::Validation("A token endpoint or pre-issued token is required".into())
        })?;
        let region = region_from_arn(&request.chat_room_arn)?;

        self.store.reset();
        self.error.send_replace(None);
        self.start_ingest();
        self.state.send_replace(ConnectionState::Connecting);
        tracing::info!("Joining chat room {} as {user_id}", request.chat_room_arn);

        let token_request = TokenRequest {
            chat_room_arn: request.chat_room_arn.clone(),
            user_id: user_id.to_string(),
            username: request.username.clone(),
        };
        let attempt = async {
            let token = tokens.fetch(&token_request).await?;
            self.transport.connect(&token, region).await
        };
        if let Err(e) = attempt.await {
            let text = user_message(&e);
            tracing::error!("Chat connection failed: {text}");
            self.stop_ingest();
            self.error.send_replace(Some(text.clone()));
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(StagecastError::Transport(text));
        }
        Ok(())
    }

    /// Sends trimmed `content`. Returns false without sending when the
    /// text is blank or the room is not connected.
    pub async fn send_message(&self, content: &str) -> Result<bool> {
        let content = content.trim();
        if content.is_empty() || self.state() != ConnectionState::Connected {
            return Ok(false);
        }
        self.transport.send(content).await?;
        Ok(true)
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.stop_ingest();
        self.store.reset();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn stop_ingest(&self) {
        let task = self.ingest.lock().take();
        if let Some(task) = task {
            task.abort();
        }
    }

    fn start_ingest(&self) {
        let mut slot = self.ingest.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let events = self.bus.subscribe();
        *slot = Some(tokio::spawn(ingest(
            events,
            self.store.clone(),
            self.state.clone(),
            self.error.clone(),
        )));
    }
}

async fn ingest(
    mut events: broadcast::Receiver<ChatEvent>,
    store: MessageStoreHandle,
    state: Arc<watch::Sender<ConnectionState>>,
    error: Arc<watch::Sender<Option<String>>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Chat ingest lagged, {missed} events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ChatEvent::State(next) => {
                tracing::info!("Chat connection state: {next:?}");
                state.send_replace(next);
            }
            ChatEvent::Message(message) => {
                let id = message.id.clone();
                if !store.append(message) {
                    tracing::debug!("Duplicate chat message {id} ignored");
                }
            }
            ChatEvent::MessageDelete(id) => {
                store.mark_deleted(&id);
            }
            ChatEvent::Error(text) => {
                tracing::warn!("Chat error: {text}");
                error.send_replace(Some(text));
            }
        }
    }
}

fn user_message(e: &StagecastError) -> String {
    match e {
        StagecastError::Transport(text)
        | StagecastError::Validation(text)
        | StagecastError::Api(text) => text.clone(),
        other => other.to_string(),
    }
}
