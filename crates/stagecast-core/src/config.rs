use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::classifier::DirectivePrefixes;
use crate::error::{Result, StagecastError};

pub fn load_config(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        StagecastError::ConfigError(format!("Failed to read config {}: {e}", path.display()))
    })?;
    let value: toml::Value = toml::from_str(&content).map_err(|e| {
        StagecastError::ConfigError(format!("Failed to parse config {}: {e}", path.display()))
    })?;
    Ok(value)
}

/// Deserializes a plugin's config table into its typed form.
///
/// Plugins declare every field with `#[serde(default)]`, so an empty table
/// yields the defaults.
pub fn plugin_config<T: DeserializeOwned>(plugin_id: &str, config: toml::Value) -> Result<T> {
    config.try_into().map_err(|e| {
        StagecastError::ConfigError(format!("Invalid config for plugin '{plugin_id}': {e}"))
    })
}

/// The `[app]` table: who the local viewer is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub local_user_id: Option<String>,
    pub username: Option<String>,
    pub admin_user_ids: Vec<String>,
    pub directives: DirectivePrefixes,
}

impl AppConfig {
    pub fn from_root(root: &toml::Value) -> Result<Self> {
        let app: Self = match root.get("app") {
            Some(table) => plugin_config("app", table.clone())?,
            None => Self::default(),
        };
        app.directives.validate()?;
        Ok(app)
    }

    /// True when `user_id` is both the local viewer and a configured admin.
    pub fn is_privileged_local(&self, user_id: &str) -> bool {
        self.local_user_id.as_deref() == Some(user_id)
            && self.admin_user_ids.iter().any(|id| id == user_id)
    }
}
