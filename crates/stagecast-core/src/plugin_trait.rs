use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub dependencies: Vec<PluginDependency>,
    pub provides: Vec<String>,
    pub category: PluginCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    pub plugin_id: String,
    pub version_req: String,
    pub optional: bool,
}

impl PluginDependency {
    pub fn required(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version_req: "0.1".into(),
            optional: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCategory {
    Gateway,
    Overlay,
    Backend,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHealth {
    pub status: HealthStatus,
    pub message: String,
    pub metrics: HashMap<String, serde_json::Value>,
}

impl PluginHealth {
    pub fn healthy(metrics: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: "OK".into(),
            metrics,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: "not running".into(),
            metrics: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[async_trait]
pub trait StagePlugin: Send + Sync {
    fn meta(&self) -> PluginMeta;

    async fn load(&mut self, config: toml::Value) -> Result<()>;
    async fn init(&mut self) -> Result<()>;
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;

    fn current_config(&self) -> serde_json::Value;

    async fn health(&self) -> PluginHealth;
}
