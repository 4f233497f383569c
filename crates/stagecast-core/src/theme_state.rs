use std::sync::Arc;

use tokio::sync::watch;

use crate::types::ThemeState;

/// Process-wide current theme. Only the theme overlay writes it; the
/// session poller and any display surface observe it.
#[derive(Debug, Clone)]
pub struct ThemeCell {
    tx: Arc<watch::Sender<Option<ThemeState>>>,
}

impl Default for ThemeCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemeCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the current theme. Observers are woken even if the new
    /// value equals the old one, since a re-announced theme restarts polling.
    pub fn publish(&self, state: ThemeState) {
        self.tx.send_replace(Some(state));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<ThemeState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ThemeState>> {
        self.tx.subscribe()
    }
}
