pub mod classifier;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event_bus;
pub mod message_store;
pub mod overlay;
pub mod plugin_loader;
pub mod plugin_trait;
pub mod theme_state;
pub mod timer;
pub mod types;

pub use classifier::{classify, Directive, DirectiveKind, DirectivePrefixes, CAPTION_ID, THEME_ID};
pub use config::{load_config, plugin_config, AppConfig};
pub use cursor::{DedupSet, DirectiveScanner, ScanCursor, ScannedDirective, DEFAULT_DEDUP_CAPACITY};
pub use error::{Result, StagecastError};
pub use event_bus::EventBus;
pub use message_store::{MessageStore, MessageStoreHandle, StoreVersion};
pub use overlay::{drive, Overlay};
pub use plugin_loader::{PluginLoader, StageContext};
pub use plugin_trait::{
    HealthStatus, PluginCategory, PluginDependency, PluginHealth, PluginMeta, StagePlugin,
};
pub use theme_state::ThemeCell;
pub use timer::OverlayTimer;
pub use types::{ChatEvent, ChatMessage, ConnectionState, Sender, ThemeState};
