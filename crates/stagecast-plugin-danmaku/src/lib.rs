use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use stagecast_core::{
    drive, plugin_config, DirectiveKind, DirectivePrefixes, DirectiveScanner, MessageStore,
    Overlay, PluginCategory, PluginHealth, PluginMeta, Result, StageContext, StagePlugin,
    StagecastError, DEFAULT_DEDUP_CAPACITY,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

const COLORS: [&str; 10] = [
    "#FFFFFF", "#FFE66D", "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#A8E6CF", "#DDA0DD",
    "#F8B195", "#C7CEEA",
];

// Medium is listed twice so it comes up half the time.
const SIZES: [BulletSize; 4] = [
    BulletSize::Small,
    BulletSize::Medium,
    BulletSize::Medium,
    BulletSize::Large,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulletSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bullet {
    pub animation_id: String,
    pub message_id: String,
    pub content: String,
    pub lane: usize,
    pub color: &'static str,
    pub size: BulletSize,
    pub expires_at: Instant,
}

pub struct DanmakuOverlay {
    scanner: DirectiveScanner,
    lifetime: Duration,
    lanes: Vec<Option<Instant>>,
    bullets: Vec<Bullet>,
    counter: u64,
    rng: StdRng,
}

impl DanmakuOverlay {
    pub fn new(
        prefixes: DirectivePrefixes,
        lanes: usize,
        lifetime: Duration,
        dedup_capacity: usize,
        rng: StdRng,
    ) -> Self {
        Self {
            scanner: DirectiveScanner::new(DirectiveKind::PlainChat, prefixes, dedup_capacity),
            lifetime,
            lanes: vec![None; lanes.max(1)],
            bullets: Vec::new(),
            counter: 0,
            rng,
        }
    }

    pub fn bullets(&self) -> &[Bullet] {
        &self.bullets
    }

    /// First free lane, held for one bullet lifetime. With every lane busy
    /// a random one is shared without extending its hold.
    fn take_lane(&mut self, now: Instant) -> usize {
        let free = self
            .lanes
            .iter()
            .position(|held| held.map_or(true, |until| until <= now));
        match free {
            Some(lane) => {
                self.lanes[lane] = Some(now + self.lifetime);
                lane
            }
            None => self.rng.gen_range(0..self.lanes.len()),
        }
    }
}

impl Overlay for DanmakuOverlay {
    type Display = Vec<Bullet>;
    type Effect = Infallible;

    fn on_store(&mut self, store: &MessageStore, now: Instant, _effects: &mut Vec<Infallible>) {
        for chat in self.scanner.drain_all(store) {
            let lane = self.take_lane(now);
            let color = COLORS.choose(&mut self.rng).copied().unwrap_or(COLORS[0]);
            let size = SIZES.choose(&mut self.rng).copied().unwrap_or(BulletSize::Medium);
            let animation_id = format!("bullet-{}", self.counter);
            self.counter += 1;
            self.bullets.push(Bullet {
                animation_id,
                message_id: chat.message.id,
                content: chat.payload,
                lane,
                color,
                size,
                expires_at: now + self.lifetime,
            });
        }
    }

    fn on_deadline(&mut self, now: Instant, _effects: &mut Vec<Infallible>) {
        self.bullets.retain(|b| b.expires_at > now);
        for held in self.lanes.iter_mut() {
            if held.is_some_and(|until| until <= now) {
                *held = None;
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.bullets.iter().map(|b| b.expires_at).min()
    }

    fn display(&self) -> Vec<Bullet> {
        self.bullets.clone()
    }

    fn sweep(&mut self) -> bool {
        self.scanner.sweep()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
struct DanmakuConfig {
    lanes: usize,
    lifetime_ms: u64,
    dedup_capacity: usize,
    sweep_ms: u64,
}

impl Default for DanmakuConfig {
    fn default() -> Self {
        Self {
            lanes: 8,
            lifetime_ms: 6000,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            sweep_ms: 60_000,
        }
    }
}

pub struct DanmakuPlugin {
    ctx: Arc<StageContext>,
    config: DanmakuConfig,
    display: Arc<watch::Sender<Vec<Bullet>>>,
    task: Option<JoinHandle<()>>,
}

impl DanmakuPlugin {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        let (display, _) = watch::channel(Vec::new());
        Self {
            ctx,
            config: DanmakuConfig::default(),
            display: Arc::new(display),
            task: None,
        }
    }

    pub fn create(ctx: Arc<StageContext>) -> Box<dyn StagePlugin> {
        Box::new(Self::new(ctx))
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Bullet>> {
        self.display.subscribe()
    }
}

#[async_trait]
impl StagePlugin for DanmakuPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            id: "danmaku".into(),
            name: "Danmaku Overlay".into(),
            version: "0.1.0".into(),
            dependencies: vec![],
            provides: vec!["bullet-feed".into()],
            category: PluginCategory::Overlay,
        }
    }

    async fn load(&mut self, config: toml::Value) -> Result<()> {
        self.config = plugin_config("danmaku", config)?;
        tracing::info!("DanmakuPlugin loaded");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        if self.config.lanes == 0 {
            return Err(StagecastError::PluginInitError(
                "danmaku needs at least one lane".into(),
            ));
        }
        tracing::info!("DanmakuPlugin initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let overlay = DanmakuOverlay::new(
            self.ctx.app.directives.clone(),
            self.config.lanes,
            Duration::from_millis(self.config.lifetime_ms),
            self.config.dedup_capacity,
            StdRng::from_entropy(),
        );
        self.task = Some(tokio::spawn(drive(
            overlay,
            self.ctx.store.clone(),
            self.display.clone(),
            Duration::from_millis(self.config.sweep_ms),
            |never| match never {},
        )));
        tracing::info!("DanmakuPlugin started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.display.send_replace(Vec::new());
        tracing::info!("DanmakuPlugin stopped");
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
        let active = self.display.borrow().len();
        metrics.insert("active_bullets".into(), serde_json::json!(active));
        PluginHealth::healthy(metrics)
    }
}

#[cfg(test)]
mod tests {
    use stagecast_core::{ChatMessage, Sender};

    use super::*;

    fn overlay(lanes: usize) -> DanmakuOverlay {
        DanmakuOverlay::new(
            DirectivePrefixes::default(),
            lanes,
            Duration::from_millis(6000),
            100,
            StdRng::seed_from_u64(7),
        )
    }

    fn chat(store: &mut MessageStore, id: &str, content: &str) {
        store.append(ChatMessage::new(id, content, Sender::new("viewer")));
    }

    #[test]
    fn plain_chat_becomes_bullets_in_free_lanes() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = overlay(8);
        chat(&mut store, "1", "hello");
        chat(&mut store, "2", "[CAPTION] not a bullet");
        chat(&mut store, "3", "world");
        overlay.on_store(&store, t0, &mut Vec::new());

        let bullets = overlay.display();
        assert_eq!(bullets.len(), 2);
        assert_eq!(bullets[0].content, "hello");
        assert_eq!(bullets[0].animation_id, "bullet-0");
        assert_eq!(bullets[0].lane, 0);
        assert_eq!(bullets[1].content, "world");
        assert_eq!(bullets[1].animation_id, "bullet-1");
        assert_eq!(bullets[1].lane, 1);
        assert!(COLORS.contains(&bullets[0].color));
        assert_eq!(overlay.next_deadline(), Some(t0 + Duration::from_millis(6000)));
    }

    #[test]
    fn bullets_expire_and_free_their_lane() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = overlay(2);
        chat(&mut store, "1", "a");
        overlay.on_store(&store, t0, &mut Vec::new());

        overlay.on_deadline(t0 + Duration::from_millis(6000), &mut Vec::new());
        assert!(overlay.display().is_empty());
        assert_eq!(overlay.next_deadline(), None);

        chat(&mut store, "2", "b");
        overlay.on_store(&store, t0 + Duration::from_millis(6001), &mut Vec::new());
        assert_eq!(overlay.bullets()[0].lane, 0);
    }

    #[test]
    fn busy_lanes_are_shared() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = overlay(2);
        for id in ["1", "2", "3", "4"] {
            chat(&mut store, id, id);
        }
        overlay.on_store(&store, t0, &mut Vec::new());
        let lanes: Vec<_> = overlay.bullets().iter().map(|b| b.lane).collect();
        assert_eq!(&lanes[..2], &[0, 1]);
        assert!(lanes[2..].iter().all(|lane| *lane < 2));
    }

    #[test]
    fn deleted_chat_is_not_shown() {
        let mut store = MessageStore::new();
        let mut overlay = overlay(8);
        chat(&mut store, "1", "oops");
        store.mark_deleted("1");
        overlay.on_store(&store, Instant::now(), &mut Vec::new());
        assert!(overlay.display().is_empty());
    }
}
