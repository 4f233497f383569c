use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecast_core::{
    drive, plugin_config, DirectiveKind, DirectivePrefixes, DirectiveScanner, MessageStore,
    Overlay, OverlayTimer, PluginCategory, PluginHealth, PluginMeta, Result, StageContext,
    StagePlugin, DEFAULT_DEDUP_CAPACITY,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptionDisplay {
    #[default]
    Idle,
    Showing { message_id: String, text: String },
}

/// Idle -> Showing -> Idle. A caption arriving while one is shown replaces
/// it and restarts the hide timer.
#[derive(Debug)]
pub struct CaptionOverlay {
    scanner: DirectiveScanner,
    timer: OverlayTimer,
    display_for: Duration,
    state: CaptionDisplay,
}

impl CaptionOverlay {
    pub fn new(prefixes: DirectivePrefixes, display_for: Duration, dedup_capacity: usize) -> Self {
        Self {
            scanner: DirectiveScanner::new(DirectiveKind::Caption, prefixes, dedup_capacity),
            timer: OverlayTimer::default(),
            display_for,
            state: CaptionDisplay::Idle,
        }
    }

    pub fn state(&self) -> &CaptionDisplay {
        &self.state
    }
}

impl Overlay for CaptionOverlay {
    type Display = CaptionDisplay;
    type Effect = Infallible;

    fn on_store(&mut self, store: &MessageStore, now: Instant, _effects: &mut Vec<Infallible>) {
        let Some(found) = self.scanner.next_directive(store) else {
            return;
        };
        tracing::debug!("Caption from {}: {}", found.message.sender.user_id, found.payload);
        self.timer.cancel();
        self.state = CaptionDisplay::Showing {
            message_id: found.message.id,
            text: found.payload,
        };
        self.timer.arm_after(now, self.display_for);
    }

    fn on_deadline(&mut self, now: Instant, _effects: &mut Vec<Infallible>) {
        if self.timer.take_due(now).is_some() {
            self.state = CaptionDisplay::Idle;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    fn display(&self) -> CaptionDisplay {
        self.state.clone()
    }

    fn sweep(&mut self) -> bool {
        self.scanner.sweep()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
struct CaptionConfig {
    display_ms: u64,
    dedup_capacity: usize,
    sweep_ms: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            display_ms: 3000,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            sweep_ms: 60_000,
        }
    }
}

pub struct CaptionPlugin {
    ctx: Arc<StageContext>,
    config: CaptionConfig,
    display: Arc<watch::Sender<CaptionDisplay>>,
    task: Option<JoinHandle<()>>,
}

impl CaptionPlugin {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        let (display, _) = watch::channel(CaptionDisplay::Idle);
        Self {
            ctx,
            config: CaptionConfig::default(),
            display: Arc::new(display),
            task: None,
        }
    }

    pub fn create(ctx: Arc<StageContext>) -> Box<dyn StagePlugin> {
        Box::new(Self::new(ctx))
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptionDisplay> {
        self.display.subscribe()
    }
}

#[async_trait]
impl StagePlugin for CaptionPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            id: "caption".into(),
            name: "Caption Overlay".into(),
            version: "0.1.0".into(),
            dependencies: vec![],
            provides: vec!["caption-overlay".into()],
            category: PluginCategory::Overlay,
        }
    }

    async fn load(&mut self, config: toml::Value) -> Result<()> {
        self.config = plugin_config("caption", config)?;
        tracing::info!("CaptionPlugin loaded");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        tracing::info!("CaptionPlugin initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let overlay = CaptionOverlay::new(
            self.ctx.app.directives.clone(),
            Duration::from_millis(self.config.display_ms),
            self.config.dedup_capacity,
        );
        self.task = Some(tokio::spawn(drive(
            overlay,
            self.ctx.store.clone(),
            self.display.clone(),
            Duration::from_millis(self.config.sweep_ms),
            |never| match never {},
        )));
        tracing::info!("CaptionPlugin started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.display.send_replace(CaptionDisplay::Idle);
        tracing::info!("CaptionPlugin stopped");
        Ok(())
    }

    fn current_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    async fn health(&self) -> PluginHealth {
        if self.task.is_none() {
            return PluginHealth::stopped();
        }
        let mut metrics = HashMap::new();
        let showing = matches!(*self.display.borrow(), CaptionDisplay::Showing { .. });
        metrics.insert("showing".into(), serde_json::json!(showing));
        PluginHealth::healthy(metrics)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stagecast_core::{AppConfig, ChatMessage, EventBus, MessageStoreHandle, Sender};

    use super::*;

    fn caption(id: &str, content: &str) -> ChatMessage {
        ChatMessage::new(id, content, Sender::new("host"))
    }

    fn overlay() -> CaptionOverlay {
        CaptionOverlay::new(DirectivePrefixes::default(), Duration::from_millis(3000), 100)
    }

    fn showing(id: &str, text: &str) -> CaptionDisplay {
        CaptionDisplay::Showing {
            message_id: id.into(),
            text: text.into(),
        }
    }

    #[test]
    fn caption_shows_then_hides_after_display_time() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = overlay();
        let mut effects = Vec::new();

        store.append(caption("c1", "[CAPTION] Hello"));
        overlay.on_store(&store, t0, &mut effects);
        assert_eq!(overlay.display(), showing("c1", "Hello"));
        assert_eq!(overlay.next_deadline(), Some(t0 + Duration::from_millis(3000)));

        overlay.on_deadline(t0 + Duration::from_millis(3000), &mut effects);
        assert_eq!(overlay.display(), CaptionDisplay::Idle);
        assert_eq!(overlay.next_deadline(), None);
    }

    #[test]
    fn new_caption_restarts_timer() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = overlay();
        let mut effects = Vec::new();

        store.append(caption("c1", "[CAPTION] first"));
        overlay.on_store(&store, t0, &mut effects);

        let t1 = t0 + Duration::from_millis(2000);
        store.append(caption("c2", "[CAPTION] second"));
        overlay.on_store(&store, t1, &mut effects);
        assert_eq!(overlay.display(), showing("c2", "second"));
        assert_eq!(overlay.next_deadline(), Some(t1 + Duration::from_millis(3000)));

        // The first caption's hide time passes without effect.
        overlay.on_deadline(t0 + Duration::from_millis(3000), &mut effects);
        assert_eq!(overlay.display(), showing("c2", "second"));
    }

    #[test]
    fn plain_chat_and_themes_are_ignored() {
        let mut store = MessageStore::new();
        let mut overlay = overlay();
        store.append(caption("m1", "just chatting"));
        store.append(caption("t1", "[THEME] Robots"));
        overlay.on_store(&store, Instant::now(), &mut Vec::new());
        assert_eq!(overlay.display(), CaptionDisplay::Idle);
        assert_eq!(overlay.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_hides_caption_after_three_seconds() {
        let store = MessageStoreHandle::new();
        let (tx, mut rx) = watch::channel(CaptionDisplay::Idle);
        let task = tokio::spawn(drive(
            overlay(),
            store.clone(),
            Arc::new(tx),
            Duration::from_secs(60),
            |never| match never {},
        ));
        tokio::task::yield_now().await;

        let start = Instant::now();
        store.append(caption("c1", "[CAPTION] Hello"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), showing("c1", "Hello"));
        assert_eq!(start.elapsed(), Duration::ZERO);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), CaptionDisplay::Idle);
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(start.elapsed() < Duration::from_millis(3010));
        task.abort();
    }

    #[tokio::test]
    async fn plugin_stop_returns_to_idle() {
        let ctx = Arc::new(StageContext::new(AppConfig::default(), Arc::new(EventBus::new(8))));
        let mut plugin = CaptionPlugin::new(ctx.clone());
        plugin.load(toml::Value::Table(toml::map::Map::new())).await.unwrap();
        plugin.start().await.unwrap();
        let mut rx = plugin.subscribe();

        ctx.store.append(caption("c1", "[CAPTION] live"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), showing("c1", "live"));

        plugin.stop().await.unwrap();
        assert_eq!(*rx.borrow(), CaptionDisplay::Idle);
        assert_eq!(plugin.health().await.status, stagecast_core::HealthStatus::Unknown);
    }
}
