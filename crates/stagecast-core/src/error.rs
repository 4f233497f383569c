use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagecastError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin load error: {0}")]
    PluginLoadError(String),

    #[error("Plugin init error: {0}")]
    PluginInitError(String),

    #[error("Dependency resolution error: {0}")]
    DependencyError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Event bus error: {0}")]
    EventBusError(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StagecastError>;
