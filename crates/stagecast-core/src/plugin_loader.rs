use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{Result, StagecastError};
use crate::event_bus::EventBus;
use crate::message_store::MessageStoreHandle;
use crate::plugin_trait::{PluginHealth, StagePlugin};
use crate::theme_state::ThemeCell;

/// Shared state handed to every plugin at construction.
pub struct StageContext {
    pub app: AppConfig,
    pub store: MessageStoreHandle,
    pub theme: ThemeCell,
    pub event_bus: Arc<EventBus>,
}

impl StageContext {
    pub fn new(app: AppConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            app,
            store: MessageStoreHandle::new(),
            theme: ThemeCell::new(),
            event_bus,
        }
    }
}

pub struct PluginLoader {
    plugins: HashMap<String, Box<dyn StagePlugin>>,
    order: Vec<String>,
    context: Arc<StageContext>,
}

impl PluginLoader {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self {
            plugins: HashMap::new(),
            order: Vec::new(),
            context,
        }
    }

    pub fn register(&mut self, plugin: Box<dyn StagePlugin>) {
        let meta = plugin.meta();
        info!("Registered plugin: {} ({})", meta.name, meta.id);
        self.plugins.insert(meta.id, plugin);
    }

    /// Orders plugins so every dependency starts before its dependents.
    /// Plugins that become ready together start in id order.
    pub fn resolve_order(&mut self) -> Result<()> {
        let mut pending: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, plugin) in &self.plugins {
            let mut waits_on = BTreeSet::new();
            for dep in plugin.meta().dependencies {
                if self.plugins.contains_key(&dep.plugin_id) {
                    waits_on.insert(dep.plugin_id);
                } else if dep.optional {
                    warn!("Plugin '{id}' runs without optional '{}'", dep.plugin_id);
                } else {
                    return Err(StagecastError::DependencyError(format!(
                        "Plugin '{id}' requires '{}', which is not registered",
                        dep.plugin_id
                    )));
                }
            }
            pending.insert(id.clone(), waits_on);
        }

        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, waits_on)| waits_on.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = pending.keys().map(String::as_str).collect();
                return Err(StagecastError::DependencyError(format!(
                    "Circular dependency among: {}",
                    stuck.join(", ")
                )));
            }
            for id in &ready {
                pending.remove(id);
            }
            for waits_on in pending.values_mut() {
                for id in &ready {
                    waits_on.remove(id);
                }
            }
            order.extend(ready);
        }

        self.order = order;
        info!("Plugin start order: {:?}", self.order);
        Ok(())
    }

    fn table_for(config: &toml::Value, id: &str) -> toml::Value {
        match config.get("plugins").and_then(|p| p.get(id)) {
            Some(table) => table.clone(),
            None => toml::Value::Table(toml::map::Map::new()),
        }
    }

    pub async fn start_all(&mut self, config: &toml::Value) -> Result<()> {
        self.resolve_order()?;

        for id in &self.order {
            let Some(plugin) = self.plugins.get_mut(id) else {
                continue;
            };
            plugin.load(Self::table_for(config, id)).await?;
            plugin.init().await?;
            plugin.start().await?;
            info!("Plugin {id} started");
        }

        Ok(())
    }

    pub async fn stop_all(&mut self) -> Result<()> {
        for id in self.order.iter().rev() {
            let Some(plugin) = self.plugins.get_mut(id) else {
                continue;
            };
            match plugin.stop().await {
                Ok(()) => info!("Plugin {id} stopped"),
                Err(e) => warn!("Plugin {id} failed to stop cleanly: {e}"),
            }
        }

        Ok(())
    }

    pub async fn health(&self, id: &str) -> Result<PluginHealth> {
        let plugin = self
            .plugins
            .get(id)
            .ok_or_else(|| StagecastError::PluginNotFound(id.to_string()))?;
        Ok(plugin.health().await)
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn context(&self) -> &Arc<StageContext> {
        &self.context
    }
}
