use tokio::sync::broadcast;

use crate::error::{Result, StagecastError};
use crate::types::ChatEvent;

/// Fan-out of transport events to every interested consumer.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn broadcast(&self, event: ChatEvent) -> Result<()> {
        self.sender.send(event).map_err(|e| {
            StagecastError::EventBusError(format!("Failed to broadcast event: {e}"))
        })?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }
}
