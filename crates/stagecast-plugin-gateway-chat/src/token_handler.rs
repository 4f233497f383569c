use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecast_core::Result;

use crate::token::ChatToken;

pub const DEFAULT_CAPABILITIES: &[&str] = &["SEND_MESSAGE"];
pub const DEFAULT_SESSION_MINUTES: u32 = 180;

/// What the issuer is asked to mint, after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatTokenRequest {
    pub room_identifier: String,
    pub user_id: String,
    pub capabilities: Vec<String>,
    pub session_duration_in_minutes: u32,
    pub attributes: HashMap<String, String>,
}

/// The service that actually mints chat tokens.
#[async_trait]
pub trait ChatTokenIssuer: Send + Sync {
    async fn create_chat_token(&self, request: &CreateChatTokenRequest) -> Result<ChatToken>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequestBody {
    chat_room_arn: Option<String>,
    user_id: Option<String>,
    username: Option<String>,
    capabilities: Option<Vec<String>>,
    session_duration_in_minutes: Option<u32>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

fn cors_headers(origin: &str) -> Vec<(String, String)> {
    vec![
        ("Access-Control-Allow-Origin".into(), origin.into()),
        ("Access-Control-Allow-Headers".into(), "Content-Type".into()),
        ("Access-Control-Allow-Methods".into(), "OPTIONS,POST".into()),
    ]
}

fn respond(status: u16, origin: &str, body: String) -> TokenHttpResponse {
    TokenHttpResponse {
        status,
        headers: cors_headers(origin),
        body,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Serves one token request. `cors_origin` is echoed on every response.
pub async fn handle_token_request(
    method: &str,
    body: Option<&str>,
    cors_origin: &str,
    issuer: &dyn ChatTokenIssuer,
) -> TokenHttpResponse {
    if method.eq_ignore_ascii_case("OPTIONS") {
        return respond(200, cors_origin, String::new());
    }

    let Some(body) = body.filter(|b| !b.is_empty()) else {
        return respond(
            400,
            cors_origin,
            serde_json::json!({"error": "Request body is required"}).to_string(),
        );
    };

    let parsed: TokenRequestBody = serde_json::from_str(body).unwrap_or_default();
    let (Some(room), Some(user_id)) = (
        non_empty(parsed.chat_room_arn),
        non_empty(parsed.user_id),
    ) else {
        return respond(
            400,
            cors_origin,
            serde_json::json!({"error": "chatRoomArn and userId are required"}).to_string(),
        );
    };

    let mut attributes = HashMap::new();
    let username = non_empty(parsed.username).unwrap_or_else(|| user_id.clone());
    attributes.insert("username".to_string(), username);
    attributes.extend(parsed.attributes);

    let request = CreateChatTokenRequest {
        room_identifier: room,
        user_id,
        capabilities: parsed.capabilities.unwrap_or_else(|| {
            DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect()
        }),
        session_duration_in_minutes: parsed
            .session_duration_in_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_SESSION_MINUTES),
        attributes,
    };

    match issuer.create_chat_token(&request).await {
        Ok(token) => match serde_json::to_string(&token) {
            Ok(body) => respond(200, cors_origin, body),
            Err(e) => failure(cors_origin, &e.to_string()),
        },
        Err(e) => {
            tracing::error!("Error creating chat token: {e}");
            failure(cors_origin, &e.to_string())
        }
    }
}

fn failure(origin: &str, details: &str) -> TokenHttpResponse {
    respond(
        500,
        origin,
        serde_json::json!({"error": "Failed to create chat token", "details": details}).to_string(),
    )
}
