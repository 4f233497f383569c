use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use stagecast_core::{Result, StagecastError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStream {
    pub id: String,
    pub kind: StreamKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    ConnectionStateChanged(StageConnectionState),
    StreamsAdded {
        participant_id: String,
        streams: Vec<StageStream>,
    },
    StreamsRemoved {
        participant_id: String,
        stream_ids: Vec<String>,
    },
    ParticipantLeft(String),
    Error(String),
}

/// Who is on stage and which of their video streams we render.
#[derive(Debug, Default)]
pub struct StageRoster {
    participants: BTreeMap<String, Vec<String>>,
    state: StageConnectionState,
    last_error: Option<String>,
}

impl StageRoster {
    pub fn apply(&mut self, event: StageEvent) {
        match event {
            StageEvent::ConnectionStateChanged(state) => {
                tracing::info!("Stage connection state: {state:?}");
                self.state = state;
            }
            StageEvent::StreamsAdded {
                participant_id,
                streams,
            } => {
                let video: Vec<String> = streams
                    .into_iter()
                    .filter(|s| s.kind == StreamKind::Video)
                    .map(|s| s.id)
                    .collect();
                // A batch without video leaves the current view untouched.
                if !video.is_empty() {
                    self.participants.insert(participant_id, video);
                }
            }
            StageEvent::StreamsRemoved {
                participant_id,
                stream_ids,
            } => {
                if let Some(streams) = self.participants.get_mut(&participant_id) {
                    streams.retain(|id| !stream_ids.contains(id));
                    if streams.is_empty() {
                        self.participants.remove(&participant_id);
                    }
                }
            }
            StageEvent::ParticipantLeft(participant_id) => {
                self.participants.remove(&participant_id);
            }
            StageEvent::Error(text) => {
                tracing::error!("Stage error: {text}");
                self.last_error = Some(text);
            }
        }
    }

    pub fn participants(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.participants
            .iter()
            .map(|(id, streams)| (id.as_str(), streams.as_slice()))
    }

    pub fn video_streams(&self, participant_id: &str) -> Option<&[String]> {
        self.participants.get(participant_id).map(Vec::as_slice)
    }

    pub fn state(&self) -> StageConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == StageConnectionState::Connected
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn clear(&mut self) {
        self.participants.clear();
        self.state = StageConnectionState::Disconnected;
    }
}

/// Subscribe-only access to a real-time stage.
#[async_trait]
pub trait StageTransport: Send + Sync {
    fn is_supported(&self) -> bool;
    async fn join(&self, participant_token: &str) -> Result<mpsc::Receiver<StageEvent>>;
    async fn leave(&self);
}

pub struct StageClient {
    transport: Arc<dyn StageTransport>,
    roster: Arc<RwLock<StageRoster>>,
    task: Option<JoinHandle<()>>,
}

impl StageClient {
    pub fn new(transport: Arc<dyn StageTransport>) -> Self {
        Self {
            transport,
            roster: Arc::new(RwLock::new(StageRoster::default())),
            task: None,
        }
    }

    pub fn roster(&self) -> Arc<RwLock<StageRoster>> {
        self.roster.clone()
    }

    pub async fn join(&mut self, participant_token: &str) -> Result<()> {
        if !self.transport.is_supported() {
            let err = StagecastError::UnsupportedEnvironment(
                "Real-time stage playback is not supported here".into(),
            );
            self.roster.write().last_error = Some(err.to_string());
            return Err(err);
        }
        if participant_token.trim().is_empty() {
            return Err(StagecastError::Validation("A participant token is required".into()));
        }

        self.leave().await;
        let mut events = match self.transport.join(participant_token).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to connect to stage: {e}");
                self.roster.write().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let roster = self.roster.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                roster.write().apply(event);
            }
        }));
        Ok(())
    }

    pub async fn leave(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.transport.leave().await;
        }
        self.roster.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tokio::time::Duration;

    use super::*;

    fn video(id: &str) -> StageStream {
        StageStream {
            id: id.into(),
            kind: StreamKind::Video,
        }
    }

    fn audio(id: &str) -> StageStream {
        StageStream {
            id: id.into(),
            kind: StreamKind::Audio,
        }
    }

    #[test]
    fn only_video_streams_are_kept() {
        let mut roster = StageRoster::default();
        roster.apply(StageEvent::StreamsAdded {
            participant_id: "p1".into(),
            streams: vec![video("v1"), audio("a1")],
        });
        roster.apply(StageEvent::StreamsAdded {
            participant_id: "p2".into(),
            streams: vec![audio("a2")],
        });
        assert_eq!(roster.video_streams("p1"), Some(&["v1".to_string()][..]));
        assert_eq!(roster.video_streams("p2"), None);
    }

    #[test]
    fn new_video_replaces_previous() {
        let mut roster = StageRoster::default();
        for id in ["v1", "v2"] {
            roster.apply(StageEvent::StreamsAdded {
                participant_id: "p1".into(),
                streams: vec![video(id)],
            });
        }
        assert_eq!(roster.video_streams("p1"), Some(&["v2".to_string()][..]));
        assert_eq!(roster.participants().count(), 1);
    }

    #[test]
    fn participants_drop_out() {
        let mut roster = StageRoster::default();
        roster.apply(StageEvent::StreamsAdded {
            participant_id: "p1".into(),
            streams: vec![video("v1")],
        });
        roster.apply(StageEvent::StreamsAdded {
            participant_id: "p2".into(),
            streams: vec![video("v2")],
        });
        roster.apply(StageEvent::StreamsRemoved {
            participant_id: "p1".into(),
            stream_ids: vec!["v1".into()],
        });
        roster.apply(StageEvent::ParticipantLeft("p2".into()));
        assert_eq!(roster.participants().count(), 0);
    }

    #[test]
    fn errors_are_recorded() {
        let mut roster = StageRoster::default();
        roster.apply(StageEvent::ConnectionStateChanged(StageConnectionState::Connected));
        roster.apply(StageEvent::Error("Stage connection error".into()));
        assert!(roster.is_connected());
        assert_eq!(roster.last_error(), Some("Stage connection error"));
    }

    struct ScriptedStage {
        supported: bool,
        feed: Mutex<Option<mpsc::Receiver<StageEvent>>>,
    }

    #[async_trait]
    impl StageTransport for ScriptedStage {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn join(&self, _participant_token: &str) -> Result<mpsc::Receiver<StageEvent>> {
            self.feed
                .lock()
                .take()
                .ok_or_else(|| StagecastError::Transport("Failed to connect to stage".into()))
        }

        async fn leave(&self) {}
    }

    #[tokio::test]
    async fn unsupported_environment_is_fatal() {
        let mut client = StageClient::new(Arc::new(ScriptedStage {
            supported: false,
            feed: Mutex::new(None),
        }));
        let err = client.join("token").await.unwrap_err();
        assert!(matches!(err, StagecastError::UnsupportedEnvironment(_)));
        assert!(client.roster().read().last_error().is_some());
    }

    #[tokio::test]
    async fn joined_stage_feeds_roster() {
        let (tx, rx) = mpsc::channel(8);
        let mut client = StageClient::new(Arc::new(ScriptedStage {
            supported: true,
            feed: Mutex::new(Some(rx)),
        }));
        client.join("token").await.unwrap();

        tx.send(StageEvent::ConnectionStateChanged(StageConnectionState::Connected))
            .await
            .unwrap();
        tx.send(StageEvent::StreamsAdded {
            participant_id: "p1".into(),
            streams: vec![video("v1")],
        })
        .await
        .unwrap();

        let roster = client.roster();
        tokio::time::timeout(Duration::from_secs(1), async {
            while roster.read().participants().count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(roster.read().is_connected());

        client.leave().await;
        assert_eq!(roster.read().participants().count(), 0);
        assert!(!roster.read().is_connected());

        let err = client.join("token").await.unwrap_err();
        assert!(matches!(err, StagecastError::Transport(_)));
    }
}
