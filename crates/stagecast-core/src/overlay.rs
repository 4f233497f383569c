//! Event loop shared by the timed overlays.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::message_store::{MessageStore, MessageStoreHandle};

/// A timed display state machine fed by the message store.
///
/// Implementations are synchronous: the driver supplies the clock, so the
/// same machine can be stepped by hand in tests.
pub trait Overlay: Send + 'static {
    type Display: Clone + PartialEq + Send + Sync + 'static;
    type Effect: Send + 'static;

    /// Called with a fresh snapshot whenever the store changes.
    fn on_store(&mut self, store: &MessageStore, now: Instant, effects: &mut Vec<Self::Effect>);

    /// Called once `next_deadline` has been reached; `now` is that deadline.
    fn on_deadline(&mut self, now: Instant, effects: &mut Vec<Self::Effect>);

    fn next_deadline(&self) -> Option<Instant>;

    fn display(&self) -> Self::Display;

    /// Periodic housekeeping. Returns true if anything was discarded.
    fn sweep(&mut self) -> bool {
        false
    }
}

fn scan<O: Overlay>(overlay: &mut O, store: &MessageStoreHandle, effects: &mut Vec<O::Effect>) {
    let snapshot = store.read();
    overlay.on_store(&snapshot, Instant::now(), effects);
}

async fn sleep_until(deadline: Option<Instant>) -> Instant {
    match deadline {
        Some(at) => {
            tokio::time::sleep_until(at).await;
            at
        }
        None => std::future::pending().await,
    }
}

/// Runs `overlay` until the task is aborted.
///
/// Effects are handed to `on_effect` right after the transition that
/// produced them, before the loop yields again.
pub async fn drive<O, F>(
    mut overlay: O,
    store: MessageStoreHandle,
    display: Arc<watch::Sender<O::Display>>,
    sweep_every: Duration,
    mut on_effect: F,
) where
    O: Overlay,
    F: FnMut(O::Effect) + Send + 'static,
{
    let mut changes = store.subscribe();
    changes.borrow_and_update();
    let mut sweep = tokio::time::interval_at(Instant::now() + sweep_every, sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut effects = Vec::new();

    scan(&mut overlay, &store, &mut effects);

    loop {
        for effect in effects.drain(..) {
            on_effect(effect);
        }
        let next = overlay.display();
        display.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        let deadline = overlay.next_deadline();
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                changes.borrow_and_update();
                scan(&mut overlay, &store, &mut effects);
            }
            at = sleep_until(deadline) => {
                overlay.on_deadline(at, &mut effects);
            }
            _ = sweep.tick() => {
                if overlay.sweep() {
                    tracing::debug!("Overlay dedup set cleared");
                }
            }
        }
    }
}
