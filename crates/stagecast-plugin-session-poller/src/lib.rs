use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecast_core::{
    plugin_config, PluginCategory, PluginDependency, PluginHealth, PluginMeta, Result,
    StageContext, StagePlugin, ThemeState,
};
use stagecast_plugin_judge_api::{JudgeApi, SessionRequest, SessionResponse};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Latest backend status for the theme it was polled for.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeResult {
    pub session_id: String,
    pub response: SessionResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerTimings {
    pub warmup: Duration,
    pub interval: Duration,
}

impl Default for PollerTimings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(3000),
            interval: Duration::from_millis(3000),
        }
    }
}

/// Where the poller publishes what it learns.
#[derive(Debug, Clone)]
pub struct PollerOutputs {
    pub results: Arc<watch::Sender<Option<ThemeResult>>>,
    pub polling: Arc<watch::Sender<bool>>,
}

impl Default for PollerOutputs {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerOutputs {
    pub fn new() -> Self {
        let (results, _) = watch::channel(None);
        let (polling, _) = watch::channel(false);
        Self {
            results: Arc::new(results),
            polling: Arc::new(polling),
        }
    }
}

/// Follows the shared theme: every new theme cancels the previous poll
/// loop, clears the last result and starts over; no theme means no polling.
///
/// Polling runs inside this future, so dropping or aborting it stops
/// every pending request and timer with it.
pub async fn run_poller(
    mut themes: watch::Receiver<Option<ThemeState>>,
    api: Arc<dyn JudgeApi>,
    timings: PollerTimings,
    outputs: PollerOutputs,
) {
    loop {
        let theme = themes.borrow_and_update().clone();
        outputs.results.send_replace(None);
        outputs.polling.send_replace(false);

        if let Some(theme) = theme {
            tracing::info!("Session polling started for {}", theme.session_id);
            outputs.polling.send_replace(true);
            tokio::select! {
                changed = themes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                () = poll_session(&theme, api.as_ref(), timings, &outputs) => {}
            }
        }

        if themes.changed().await.is_err() {
            break;
        }
    }
    outputs.polling.send_replace(false);
}

async fn poll_session(
    theme: &ThemeState,
    api: &dyn JudgeApi,
    timings: PollerTimings,
    outputs: &PollerOutputs,
) {
    tokio::time::sleep(timings.warmup).await;

    let request = SessionRequest {
        session_id: theme.session_id.clone(),
        theme: theme.theme.clone(),
    };
    let mut ticker = tokio::time::interval(timings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let response = match api.create_session(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Session poll for {} failed: {e}", request.session_id);
                continue;
            }
        };

        let complete = response.is_complete();
        tracing::debug!("Session {} status: {}", request.session_id, response.message);
        outputs.results.send_replace(Some(ThemeResult {
            session_id: request.session_id.clone(),
            response,
        }));
        if complete {
            tracing::info!("Session {} complete, polling stopped", request.session_id);
            outputs.polling.send_replace(false);
            return;
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
struct PollerConfig {
    warmup_ms: u64,
    interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 3000,
            interval_ms: 3000,
        }
    }
}

pub struct SessionPollerPlugin {
    ctx: Arc<StageContext>,
    api: Arc<dyn JudgeApi>,
    config: PollerConfig,
    outputs: PollerOutputs,
    task: Option<JoinHandle<()>>,
}

impl SessionPollerPlugin {
    pub fn new(ctx: Arc<StageContext>, api: Arc<dyn JudgeApi>) -> Self {
        Self {
            ctx,
            api,
            config: PollerConfig::default(),
            outputs: PollerOutputs::new(),
            task: None,
        }
    }

    pub fn create(ctx: Arc<StageContext>, api: Arc<dyn JudgeApi>) -> Box<dyn StagePlugin> {
        Box::new(Self::new(ctx, api))
    }

    pub fn results(&self) -> watch::Receiver<Option<ThemeResult>> {
        self.outputs.results.subscribe()
    }

    pub fn is_polling(&self) -> watch::Receiver<bool> {
        self.outputs.polling.subscribe()
    }
}

#[async_trait]
impl StagePlugin for SessionPollerPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            id: "session-poller".into(),
            name: "Session Poller".into(),
            version: "0.1.0".into(),
            dependencies: vec![
                PluginDependency::required("judge-api"),
                PluginDependency {
                    optional: true,
                    ..PluginDependency::required("theme")
                },
            ],
            provides: vec!["theme-result".into()],
            category: PluginCategory::Backend,
        }
    }

    async fn load(&mut self, config: toml::Value) -> Result<()> {
        self.config = plugin_config("session-poller", config)?;
        tracing::info!("SessionPollerPlugin loaded");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        tracing::info!("SessionPollerPlugin initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let timings = PollerTimings {
            warmup: Duration::from_millis(self.config.warmup_ms),
            interval: Duration::from_millis(self.config.interval_ms),
        };
        self.task = Some(tokio::spawn(run_poller(
            self.ctx.theme.subscribe(),
            self.api.clone(),
            timings,
            self.outputs.clone(),
        )));
        tracing::info!("SessionPollerPlugin started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outputs.polling.send_replace(false);
        tracing::info!("SessionPollerPlugin stopped");
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
        let polling = *self.outputs.polling.borrow();
        metrics.insert("polling".into(), serde_json::json!(polling));
        PluginHealth::healthy(metrics)
    }
}
