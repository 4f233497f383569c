use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use stagecast_core::{Result, StagecastError};

/// Credential handed to the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatToken {
    pub token: String,
    pub session_expiration_time: DateTime<Utc>,
    pub token_expiration_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub chat_room_arn: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch(&self, request: &TokenRequest) -> Result<ChatToken>;
}

/// Asks the token-issuing endpoint for a fresh chat token.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch(&self, request: &TokenRequest) -> Result<ChatToken> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| StagecastError::Transport(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            return Err(StagecastError::Transport(token_error_reason(&body)));
        }

        response
            .json::<ChatToken>()
            .await
            .map_err(|e| StagecastError::Transport(format!("Malformed token response: {e}")))
    }
}

fn token_error_reason(body: &serde_json::Value) -> String {
    body.get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("Failed to fetch token")
        .to_string()
}

/// Pre-issued token, re-stamped with a one hour lifetime on every fetch.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch(&self, _request: &TokenRequest) -> Result<ChatToken> {
        let expires = Utc::now() + Duration::hours(1);
        Ok(ChatToken {
            token: self.token.clone(),
            session_expiration_time: expires,
            token_expiration_time: expires,
        })
    }
}
