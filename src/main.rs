use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use stagecast_core::{load_config, AppConfig, EventBus, PluginLoader, StageContext};
use stagecast_plugin_caption::CaptionPlugin;
use stagecast_plugin_danmaku::DanmakuPlugin;
use stagecast_plugin_gateway_chat::GatewayChatPlugin;
use stagecast_plugin_judge_api::{HttpJudgeApi, JudgeApiPlugin};
use stagecast_plugin_session_poller::SessionPollerPlugin;
use stagecast_plugin_theme::ThemePlugin;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn log_changes<T>(surface: &'static str, mut rx: watch::Receiver<T>)
where
    T: Debug + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            tracing::info!("{surface}: {:?}", *rx.borrow_and_update());
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("stagecast starting...");

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stagecast.toml"));
    let config = load_config(&path)?;
    let app = AppConfig::from_root(&config)?;

    let ctx = Arc::new(StageContext::new(app, Arc::new(EventBus::new(256))));
    let judge = Arc::new(HttpJudgeApi::from_config(&config)?);

    let caption = CaptionPlugin::new(ctx.clone());
    let theme = ThemePlugin::new(ctx.clone(), judge.clone());
    let danmaku = DanmakuPlugin::new(ctx.clone());
    let poller = SessionPollerPlugin::new(ctx.clone(), judge.clone());
    log_changes("caption", caption.subscribe());
    log_changes("theme", theme.subscribe());
    log_changes("danmaku", danmaku.subscribe());
    log_changes("judging", poller.is_polling());

    let mut results = poller.results();
    tokio::spawn(async move {
        while results.changed().await.is_ok() {
            let Some(result) = results.borrow_and_update().clone() else {
                continue;
            };
            if !result.response.is_complete() {
                continue;
            }
            for comment in result.response.judge_comments() {
                tracing::info!(
                    "[{}] {}: {} ({})",
                    result.session_id,
                    comment.model,
                    comment.score,
                    comment.reason
                );
            }
        }
    });

    let mut loader = PluginLoader::new(ctx.clone());
    loader.register(JudgeApiPlugin::create(judge));
    loader.register(GatewayChatPlugin::create(ctx.clone()));
    loader.register(Box::new(caption));
    loader.register(Box::new(theme));
    loader.register(Box::new(danmaku));
    loader.register(Box::new(poller));
    loader.start_all(&config).await?;

    tracing::info!("stagecast initialized. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    loader.stop_all().await?;

    Ok(())
}
