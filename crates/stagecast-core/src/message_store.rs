//! Append-only chat history shared by every overlay.
//!
//! Indices never shift during an epoch: deletions are tombstones, and a
//! reset starts a new epoch so scan cursors know to start over.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::watch;

use crate::types::ChatMessage;

/// Change signal published after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreVersion {
    pub epoch: u64,
    pub len: usize,
    pub revision: u64,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    ids: HashSet<String>,
    deleted: HashSet<String>,
    epoch: u64,
    revision: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends in arrival order. A message whose id is already present is
    /// ignored and `false` is returned.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.revision += 1;
        true
    }

    pub fn mark_deleted(&mut self, id: &str) -> bool {
        if !self.ids.contains(id) || !self.deleted.insert(id.to_string()) {
            return false;
        }
        self.revision += 1;
        true
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.deleted.clear();
        self.epoch += 1;
        self.revision += 1;
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, index: usize) -> Option<&ChatMessage> {
        self.messages.get(index)
    }

    /// Messages strictly after `index`; `None` means from the start.
    pub fn since(&self, index: Option<usize>) -> &[ChatMessage] {
        let start = index.map_or(0, |i| i + 1).min(self.messages.len());
        &self.messages[start..]
    }

    /// Messages still visible in the chat panel.
    pub fn visible(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| !self.deleted.contains(&m.id))
    }

    pub fn version(&self) -> StoreVersion {
        StoreVersion {
            epoch: self.epoch,
            len: self.messages.len(),
            revision: self.revision,
        }
    }
}

/// Shared, observable handle to the process-wide [`MessageStore`].
#[derive(Debug, Clone)]
pub struct MessageStoreHandle {
    inner: Arc<RwLock<MessageStore>>,
    changes: Arc<watch::Sender<StoreVersion>>,
}

impl Default for MessageStoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStoreHandle {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(StoreVersion::default());
        Self {
            inner: Arc::new(RwLock::new(MessageStore::new())),
            changes: Arc::new(changes),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MessageStore> {
        self.inner.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreVersion> {
        self.changes.subscribe()
    }

    pub fn append(&self, message: ChatMessage) -> bool {
        self.mutate(|store| store.append(message))
    }

    pub fn mark_deleted(&self, id: &str) -> bool {
        self.mutate(|store| store.mark_deleted(id))
    }

    pub fn reset(&self) {
        self.mutate(|store| {
            store.reset();
            true
        });
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn mutate(&self, f: impl FnOnce(&mut MessageStore) -> bool) -> bool {
        let (changed, version) = {
            let mut store = self.inner.write();
            let changed = f(&mut store);
            (changed, store.version())
        };
        if changed {
            self.changes.send_replace(version);
        }
        changed
    }
}
