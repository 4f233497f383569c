pub mod session;
pub mod stage;
pub mod token;
pub mod token_handler;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecast_core::{
    plugin_config, PluginCategory, PluginHealth, PluginMeta, Result, StageContext, StagePlugin,
    StagecastError,
};

pub use session::{region_from_arn, ChatSession, ConnectRequest};
pub use stage::{
    StageClient, StageConnectionState, StageEvent, StageRoster, StageStream, StageTransport,
    StreamKind,
};
pub use token::{ChatToken, HttpTokenProvider, StaticTokenProvider, TokenProvider, TokenRequest};
pub use token_handler::{
    handle_token_request, ChatTokenIssuer, CreateChatTokenRequest, TokenHttpResponse,
};
pub use transport::{ChatTransport, IvsChatTransport};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
struct GatewayChatConfig {
    chat_room_arn: String,
    token_endpoint: Option<String>,
    chat_token: Option<String>,
    /// Overrides the regional `wss://edge.ivschat.*` endpoint.
    chat_endpoint: Option<String>,
}

pub struct GatewayChatPlugin {
    ctx: Arc<StageContext>,
    config: GatewayChatConfig,
    session: Option<Arc<ChatSession>>,
}

impl GatewayChatPlugin {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self {
            ctx,
            config: GatewayChatConfig::default(),
            session: None,
        }
    }

    pub fn create(ctx: Arc<StageContext>) -> Box<dyn StagePlugin> {
        Box::new(Self::new(ctx))
    }

    /// The live chat session, once the plugin is initialized.
    pub fn session(&self) -> Option<Arc<ChatSession>> {
        self.session.clone()
    }

    fn token_provider(&self) -> Option<Arc<dyn TokenProvider>> {
        if let Some(endpoint) = self.config.token_endpoint.as_deref().filter(|e| !e.is_empty()) {
            return Some(Arc::new(HttpTokenProvider::new(endpoint)));
        }
        self.config
            .chat_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| Arc::new(StaticTokenProvider::new(t)) as Arc<dyn TokenProvider>)
    }
}

#[async_trait]
impl StagePlugin for GatewayChatPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            id: "gateway-chat".into(),
            name: "Chat Gateway".into(),
            version: "0.1.0".into(),
            dependencies: vec![],
            provides: vec!["gateway".into()],
            category: PluginCategory::Gateway,
        }
    }

    async fn load(&mut self, config: toml::Value) -> Result<()> {
        self.config = plugin_config("gateway-chat", config)?;
        tracing::info!("GatewayChatPlugin loaded");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        if !self.config.chat_room_arn.is_empty() {
            region_from_arn(&self.config.chat_room_arn)
                .map_err(|e| StagecastError::ConfigError(e.to_string()))?;
        }

        let mut transport = IvsChatTransport::new(self.ctx.event_bus.clone());
        if let Some(endpoint) = &self.config.chat_endpoint {
            transport = transport.with_endpoint(endpoint.clone());
        }
        self.session = Some(Arc::new(ChatSession::new(
            self.ctx.store.clone(),
            self.ctx.event_bus.clone(),
            self.token_provider(),
            Arc::new(transport),
        )));
        tracing::info!("GatewayChatPlugin initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(StagecastError::PluginInitError("gateway-chat not initialized".into()));
        };
        if self.config.chat_room_arn.is_empty() {
            tracing::warn!("No chat_room_arn configured; chat stays offline");
            return Ok(());
        }

        let request = ConnectRequest {
            chat_room_arn: self.config.chat_room_arn.clone(),
            user_id: self.ctx.app.local_user_id.clone(),
            username: self.ctx.app.username.clone(),
        };
        // A failed join is surfaced on the session; overlays keep running.
        if let Err(e) = session.connect(&request).await {
            tracing::error!("Chat join failed: {e}");
        }
        tracing::info!("GatewayChatPlugin started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            session.disconnect().await;
        }
        tracing::info!("GatewayChatPlugin stopped");
        Ok(())
    }

    fn current_config(&self) -> serde_json::Value {
        let mut config = serde_json::to_value(&self.config).unwrap_or_default();
        if let Some(token) = config.get_mut("chat_token").filter(|t| !t.is_null()) {
            *token = serde_json::Value::String("***".into());
        }
        config
    }

    async fn health(&self) -> PluginHealth {
        let Some(session) = &self.session else {
            return PluginHealth::stopped();
        };
        let mut metrics = HashMap::new();
        metrics.insert("state".into(), serde_json::json!(session.state()));
        metrics.insert("messages".into(), serde_json::json!(self.ctx.store.len()));
        if let Some(error) = session.last_error() {
            metrics.insert("last_error".into(), serde_json::json!(error));
        }
        PluginHealth::healthy(metrics)
    }
}
