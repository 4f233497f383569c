mod machine;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecast_core::{
    drive, plugin_config, PluginCategory, PluginDependency, PluginHealth, PluginMeta, Result,
    StageContext, StagePlugin, ThemeCell, DEFAULT_DEDUP_CAPACITY,
};
use stagecast_plugin_judge_api::JudgeApi;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub use machine::{ThemeDisplay, ThemeEffect, ThemeOverlay, ThemeTimings};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
struct ThemeConfig {
    pre_countdown_ms: u64,
    tick_ms: u64,
    countdown_from: u32,
    dedup_capacity: usize,
    sweep_ms: u64,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            pre_countdown_ms: 2000,
            tick_ms: 1000,
            countdown_from: 3,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            sweep_ms: 60_000,
        }
    }
}

impl ThemeConfig {
    fn timings(&self) -> ThemeTimings {
        ThemeTimings {
            pre_countdown: Duration::from_millis(self.pre_countdown_ms),
            tick: Duration::from_millis(self.tick_ms),
            countdown_from: self.countdown_from,
        }
    }
}

/// Applies a theme effect: adoption publishes the shared theme, and a
/// finished countdown on the admin's own client asks for the result.
pub fn apply_effect(effect: ThemeEffect, theme: &ThemeCell, api: &Arc<dyn JudgeApi>) {
    match effect {
        ThemeEffect::Adopted(state) => theme.publish(state),
        ThemeEffect::CountdownFinished {
            session_id,
            privileged: true,
        } => {
            let api = api.clone();
            tokio::spawn(async move {
                match api.get_result(Some(&session_id)).await {
                    Ok(result) => {
                        tracing::info!("Result for {session_id}: {}", result.message)
                    }
                    Err(e) => tracing::warn!("Result request for {session_id} failed: {e}"),
                }
            });
        }
        ThemeEffect::CountdownFinished { session_id, .. } => {
            tracing::debug!("Countdown for {session_id} finished");
        }
    }
}

pub struct ThemePlugin {
    ctx: Arc<StageContext>,
    api: Arc<dyn JudgeApi>,
    config: ThemeConfig,
    display: Arc<watch::Sender<ThemeDisplay>>,
    task: Option<JoinHandle<()>>,
}

impl ThemePlugin {
    pub fn new(ctx: Arc<StageContext>, api: Arc<dyn JudgeApi>) -> Self {
        let (display, _) = watch::channel(ThemeDisplay::Idle);
        Self {
            ctx,
            api,
            config: ThemeConfig::default(),
            display: Arc::new(display),
            task: None,
        }
    }

    pub fn create(ctx: Arc<StageContext>, api: Arc<dyn JudgeApi>) -> Box<dyn StagePlugin> {
        Box::new(Self::new(ctx, api))
    }

    pub fn subscribe(&self) -> watch::Receiver<ThemeDisplay> {
        self.display.subscribe()
    }
}

#[async_trait]
impl StagePlugin for ThemePlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            id: "theme".into(),
            name: "Theme Countdown Overlay".into(),
            version: "0.1.0".into(),
            dependencies: vec![PluginDependency::required("judge-api")],
            provides: vec!["theme-overlay".into(), "theme-state".into()],
            category: PluginCategory::Overlay,
        }
    }

    async fn load(&mut self, config: toml::Value) -> Result<()> {
        self.config = plugin_config("theme", config)?;
        tracing::info!("ThemePlugin loaded");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        tracing::info!("ThemePlugin initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let overlay = ThemeOverlay::new(
            self.ctx.app.clone(),
            self.config.timings(),
            self.config.dedup_capacity,
        );
        let theme = self.ctx.theme.clone();
        let api = self.api.clone();
        self.task = Some(tokio::spawn(drive(
            overlay,
            self.ctx.store.clone(),
            self.display.clone(),
            Duration::from_millis(self.config.sweep_ms),
            move |effect| apply_effect(effect, &theme, &api),
        )));
        tracing::info!("ThemePlugin started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.display.send_replace(ThemeDisplay::Idle);
        tracing::info!("ThemePlugin stopped");
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
        let theme = self.ctx.theme.current().map(|t| t.theme);
        metrics.insert("current_theme".into(), serde_json::json!(theme));
        PluginHealth::healthy(metrics)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stagecast_core::{AppConfig, ChatMessage, EventBus, Sender, StagecastError};
    use stagecast_plugin_judge_api::{ModelRequest, ModelResponse, SessionRequest, SessionResponse};
    use tokio::time::Instant;

    use super::*;

    #[derive(Default)]
    struct RecordingApi {
        results: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JudgeApi for RecordingApi {
        async fn create_session(&self, _request: &SessionRequest) -> Result<SessionResponse> {
            Err(StagecastError::Api("not used".into()))
        }

        async fn create_invocation(&self, _request: &ModelRequest) -> Result<ModelResponse> {
            Err(StagecastError::Api("not used".into()))
        }

        async fn get_result(&self, session_id: Option<&str>) -> Result<SessionResponse> {
            self.results
                .lock()
                .unwrap()
                .push(session_id.unwrap_or_default().to_string());
            Ok(SessionResponse {
                status: true,
                message: "success".into(),
                data: None,
                image_url: String::new(),
            })
        }
    }

    struct Harness {
        ctx: Arc<StageContext>,
        api: Arc<RecordingApi>,
        plugin: ThemePlugin,
        rx: watch::Receiver<ThemeDisplay>,
    }

    async fn harness(local: &str) -> Harness {
        let app = AppConfig {
            local_user_id: Some(local.into()),
            admin_user_ids: vec!["host".into()],
            ..AppConfig::default()
        };
        let ctx = Arc::new(StageContext::new(app, Arc::new(EventBus::new(8))));
        let api = Arc::new(RecordingApi::default());
        let mut plugin = ThemePlugin::new(ctx.clone(), api.clone());
        plugin.load(toml::Value::Table(toml::map::Map::new())).await.unwrap();
        plugin.start().await.unwrap();
        let rx = plugin.subscribe();
        tokio::task::yield_now().await;
        Harness { ctx, api, plugin, rx }
    }

    /// Records (ms since `start`, display) until the overlay is idle again.
    async fn record_cycle(rx: &mut watch::Receiver<ThemeDisplay>, start: Instant) -> Vec<(u128, ThemeDisplay)> {
        let mut seen = Vec::new();
        loop {
            rx.changed().await.unwrap();
            let state = rx.borrow_and_update().clone();
            seen.push((start.elapsed().as_millis(), state.clone()));
            if state == ThemeDisplay::Idle {
                return seen;
            }
        }
    }

    fn countdown(theme: &str, remaining: u32) -> ThemeDisplay {
        ThemeDisplay::CountingDown { theme: theme.into(), remaining }
    }

    fn showing(theme: &str) -> ThemeDisplay {
        ThemeDisplay::ShowingTheme { theme: theme.into() }
    }

    #[tokio::test(start_paused = true)]
    async fn viewer_cycle_keeps_theme_and_skips_result() {
        let mut h = harness("viewer").await;
        let start = Instant::now();
        h.ctx.store.append(ChatMessage::new("t1", "[THEME] Robots", Sender::new("producer")));

        let seen = record_cycle(&mut h.rx, start).await;
        assert_eq!(
            seen,
            vec![
                (0, showing("Robots")),
                (2000, countdown("Robots", 3)),
                (3000, countdown("Robots", 2)),
                (4000, countdown("Robots", 1)),
                (5000, ThemeDisplay::Idle),
            ]
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let theme = h.ctx.theme.current().unwrap();
        assert_eq!(theme.theme, "Robots");
        assert_eq!(theme.session_id, "Robots_session_id");
        assert!(h.api.results.lock().unwrap().is_empty());
        h.plugin.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn admin_cycle_requests_result_once() {
        let mut h = harness("host").await;
        let start = Instant::now();
        h.ctx.store.append(ChatMessage::new("t1", "[THEME] Robots", Sender::new("host")));

        let seen = record_cycle(&mut h.rx, start).await;
        assert_eq!(seen.last().unwrap().0, 5000);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*h.api.results.lock().unwrap(), vec!["Robots_session_id".to_string()]);
        h.plugin.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_theme_mid_countdown_supersedes_first() {
        let mut h = harness("host").await;
        let start = Instant::now();
        let mut theme_rx = h.ctx.theme.subscribe();
        h.ctx.store.append(ChatMessage::new("t1", "[THEME] Robots", Sender::new("host")));

        tokio::time::sleep_until(start + Duration::from_millis(3500)).await;
        assert_eq!(*h.rx.borrow_and_update(), countdown("Robots", 2));
        h.ctx.store.append(ChatMessage::new("t2", "[THEME] Cats", Sender::new("host")));

        let seen = record_cycle(&mut h.rx, start).await;
        assert_eq!(
            seen,
            vec![
                (3500, showing("Cats")),
                (5500, countdown("Cats", 3)),
                (6500, countdown("Cats", 2)),
                (7500, countdown("Cats", 1)),
                (8500, ThemeDisplay::Idle),
            ]
        );
        assert_eq!(theme_rx.borrow_and_update().as_ref().unwrap().theme, "Cats");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*h.api.results.lock().unwrap(), vec!["Cats_session_id".to_string()]);
        h.plugin.stop().await.unwrap();
    }
}
