use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Sender {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            attributes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub send_time: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>, sender: Sender) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender,
            send_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the chat transport reports, in transport order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ChatEvent {
    State(ConnectionState),
    Message(ChatMessage),
    MessageDelete(String),
    Error(String),
}

/// The competition theme currently in play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeState {
    pub theme: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ThemeState {
    pub fn new(theme: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let theme = theme.into();
        let session_id = format!("{theme}_session_id");
        Self {
            theme,
            session_id,
            timestamp,
        }
    }
}
