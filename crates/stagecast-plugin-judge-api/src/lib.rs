use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use stagecast_core::{
    plugin_config, PluginCategory, PluginHealth, PluginMeta, Result, StagePlugin, StagecastError,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/";

/// Values the backend reports in `SessionResponse::message`.
pub mod session_message {
    pub const INITIALIZE: &str = "initialize";
    pub const WAITING: &str = "waiting";
    pub const SUCCESS: &str = "success";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
    pub theme: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub reason: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub status: bool,
    pub message: String,
    pub data: Option<HashMap<String, ModelResponse>>,
    #[serde(default)]
    pub image_url: String,
}

/// One judge's verdict, flattened for display.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeComment {
    pub model: String,
    pub score: i64,
    pub reason: String,
}

impl SessionResponse {
    /// Judging has finished and no further polling is needed.
    pub fn is_complete(&self) -> bool {
        self.status && self.message == session_message::SUCCESS
    }

    pub fn judge_comments(&self) -> Vec<JudgeComment> {
        let mut comments: Vec<JudgeComment> = self
            .data
            .iter()
            .flatten()
            .map(|(model, response)| JudgeComment {
                model: model.clone(),
                score: response.score,
                reason: response.reason.clone(),
            })
            .collect();
        comments.sort_by(|a, b| a.model.cmp(&b.model));
        comments
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
    pub theme: String,
    /// Base64-encoded image data.
    pub image: String,
}

impl ModelRequest {
    pub fn with_image_bytes(model: impl Into<String>, theme: impl Into<String>, image: &[u8]) -> Self {
        Self {
            model: model.into(),
            theme: theme.into(),
            image: base64::engine::general_purpose::STANDARD.encode(image),
        }
    }
}

/// The judging backend, as seen by the overlays and the poller.
#[async_trait]
pub trait JudgeApi: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionResponse>;
    async fn create_invocation(&self, request: &ModelRequest) -> Result<ModelResponse>;
    async fn get_result(&self, session_id: Option<&str>) -> Result<SessionResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpJudgeApi {
    client: Client,
    base_url: String,
}

impl HttpJudgeApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Builds the client from the root config's `[plugins.judge-api]` table.
    pub fn from_config(root: &toml::Value) -> Result<Self> {
        let table = root
            .get("plugins")
            .and_then(|p| p.get("judge-api"))
            .cloned()
            .unwrap_or(toml::Value::Table(toml::map::Map::new()));
        let config: JudgeApiConfig = plugin_config("judge-api", table)?;
        Ok(Self::new(config.base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StagecastError::Api(format!("HTTP error {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| StagecastError::Api(format!("Parse error: {e}")))
    }
}

#[async_trait]
impl JudgeApi for HttpJudgeApi {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionResponse> {
        tracing::debug!("Session request: {}", request.session_id);
        let resp = self
            .client
            .post(self.endpoint("session"))
            .json(request)
            .send()
            .await
            .map_err(|e| StagecastError::Api(format!("HTTP error: {e}")))?;
        Self::decode(resp).await
    }

    async fn create_invocation(&self, request: &ModelRequest) -> Result<ModelResponse> {
        tracing::info!("Invocation request: model={} theme={}", request.model, request.theme);
        let resp = self
            .client
            .post(self.endpoint("invocations"))
            .json(request)
            .send()
            .await
            .map_err(|e| StagecastError::Api(format!("HTTP error: {e}")))?;
        Self::decode(resp).await
    }

    async fn get_result(&self, session_id: Option<&str>) -> Result<SessionResponse> {
        let mut req = self.client.get(self.endpoint("result"));
        if let Some(session_id) = session_id {
            req = req.query(&[("session_id", session_id)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| StagecastError::Api(format!("HTTP error: {e}")))?;
        Self::decode(resp).await
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
struct JudgeApiConfig {
    base_url: String,
}

impl Default for JudgeApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

/// Owns the shared [`HttpJudgeApi`] and checks its configuration at load.
pub struct JudgeApiPlugin {
    config: JudgeApiConfig,
    api: Arc<HttpJudgeApi>,
}

impl JudgeApiPlugin {
    pub fn new(api: Arc<HttpJudgeApi>) -> Self {
        Self {
            config: JudgeApiConfig {
                base_url: api.base_url().to_string(),
            },
            api,
        }
    }

    pub fn create(api: Arc<HttpJudgeApi>) -> Box<dyn StagePlugin> {
        Box::new(Self::new(api))
    }
}

#[async_trait]
impl StagePlugin for JudgeApiPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            id: "judge-api".into(),
            name: "Judge API Plugin".into(),
            version: "0.1.0".into(),
            dependencies: vec![],
            provides: vec!["judge-api".into()],
            category: PluginCategory::Backend,
        }
    }

    async fn load(&mut self, config: toml::Value) -> Result<()> {
        let config: JudgeApiConfig = plugin_config("judge-api", config)?;
        self.config = config;
        tracing::info!("JudgeApiPlugin loaded");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        if !self.config.base_url.starts_with("http://") && !self.config.base_url.starts_with("https://") {
            return Err(StagecastError::PluginInitError(format!(
                "judge-api base_url must be http(s): {}",
                self.config.base_url
            )));
        }
        tracing::info!("JudgeApiPlugin initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        tracing::info!("JudgeApiPlugin started ({})", self.api.base_url());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        tracing::info!("JudgeApiPlugin stopped");
        Ok(())
    }

    fn current_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    async fn health(&self) -> PluginHealth {
        let mut metrics = HashMap::new();
        metrics.insert("base_url".into(), serde_json::json!(self.api.base_url()));
        PluginHealth::healthy(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_added() {
        let api = HttpJudgeApi::new("http://judge:8000");
        assert_eq!(api.endpoint("session"), "http://judge:8000/session");
        let api = HttpJudgeApi::new("http://judge:8000/");
        assert_eq!(api.endpoint("result"), "http://judge:8000/result");
    }

    #[test]
    fn completion_requires_status_and_success() {
        let body = r#"{"status": true, "message": "success", "data": {"nova": {"reason": "ok", "score": 80}}, "image_url": "x.png"}"#;
        let resp: SessionResponse = serde_json::from_str(body).unwrap();
        assert!(resp.is_complete());

        let waiting: SessionResponse =
            serde_json::from_str(r#"{"status": false, "message": "waiting", "data": null}"#).unwrap();
        assert!(!waiting.is_complete());
        assert_eq!(waiting.image_url, "");

        let odd: SessionResponse =
            serde_json::from_str(r#"{"status": true, "message": "no session found", "data": null, "image_url": ""}"#)
                .unwrap();
        assert!(!odd.is_complete());
    }

    #[test]
    fn judge_comments_are_sorted_by_model() {
        let mut data = HashMap::new();
        data.insert("zeta".to_string(), ModelResponse { reason: "meh".into(), score: 40 });
        data.insert("alpha".to_string(), ModelResponse { reason: "great".into(), score: 95 });
        let resp = SessionResponse {
            status: true,
            message: session_message::SUCCESS.into(),
            data: Some(data),
            image_url: String::new(),
        };
        let comments = resp.judge_comments();
        assert_eq!(comments[0].model, "alpha");
        assert_eq!(comments[0].score, 95);
        assert_eq!(comments[1].model, "zeta");
    }

    #[test]
    fn model_request_encodes_image() {
        let req = ModelRequest::with_image_bytes("amazon.nova-pro-v1:0", "C", b"png");
        assert_eq!(req.image, "cG5n");
    }

    #[test]
    fn client_reads_plugin_table() {
        let root: toml::Value = toml::from_str("[plugins.judge-api]\nbase_url = \"https://judge.example\"").unwrap();
        let api = HttpJudgeApi::from_config(&root).unwrap();
        assert_eq!(api.base_url(), "https://judge.example/");
        let api = HttpJudgeApi::from_config(&toml::Value::Table(toml::map::Map::new())).unwrap();
        assert_eq!(api.base_url(), DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn init_rejects_non_http_base() {
        let mut plugin = JudgeApiPlugin::new(Arc::new(HttpJudgeApi::new("ftp://judge")));
        let table: toml::Value = toml::from_str("base_url = \"ftp://judge\"").unwrap();
        plugin.load(table).await.unwrap();
        assert!(matches!(plugin.init().await, Err(StagecastError::PluginInitError(_))));
    }
}
