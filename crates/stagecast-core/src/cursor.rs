//! Per-overlay bookkeeping for scanning only newly appended messages.

use std::collections::HashSet;

use crate::classifier::{DirectiveKind, DirectivePrefixes};
use crate::message_store::MessageStore;
use crate::types::ChatMessage;

pub const DEFAULT_DEDUP_CAPACITY: usize = 100;

/// Position of the last scanned message within the current store epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    epoch: u64,
    last_scanned: Option<usize>,
}

impl ScanCursor {
    pub fn last_scanned(&self) -> Option<usize> {
        self.last_scanned
    }

    /// Returns the unseen slice and advances to the end of it, whether or
    /// not the caller acts on anything in it.
    pub fn advance<'a>(&mut self, store: &'a MessageStore) -> &'a [ChatMessage] {
        if store.epoch() != self.epoch {
            self.epoch = store.epoch();
            self.last_scanned = None;
        }
        let fresh = store.since(self.last_scanned);
        if !store.is_empty() {
            self.last_scanned = Some(store.len() - 1);
        }
        fresh
    }
}

/// Ids already acted upon. Cleared wholesale once it grows past capacity,
/// after which a very old directive could be acted on again.
#[derive(Debug, Clone)]
pub struct DedupSet {
    ids: HashSet<String>,
    capacity: usize,
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if the set was cleared.
    pub fn sweep(&mut self) -> bool {
        if self.ids.len() > self.capacity {
            self.ids.clear();
            true
        } else {
            false
        }
    }
}

/// A directive picked out of a scan, with the message that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDirective {
    pub message: ChatMessage,
    pub payload: String,
}

/// Cursor plus dedup set, as owned by one overlay.
#[derive(Debug, Clone)]
pub struct DirectiveScanner {
    kind: DirectiveKind,
    prefixes: DirectivePrefixes,
    cursor: ScanCursor,
    processed: DedupSet,
}

impl DirectiveScanner {
    pub fn new(kind: DirectiveKind, prefixes: DirectivePrefixes, dedup_capacity: usize) -> Self {
        Self {
            kind,
            prefixes,
            cursor: ScanCursor::default(),
            processed: DedupSet::new(dedup_capacity),
        }
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    pub fn processed(&self) -> &DedupSet {
        &self.processed
    }

    /// Scans messages appended since the last call and returns the first
    /// not-yet-processed directive of this scanner's kind. Further matches
    /// in the same batch are passed over.
    pub fn next_directive(&mut self, store: &MessageStore) -> Option<ScannedDirective> {
        let fresh = self.cursor.advance(store);
        for message in fresh {
            if store.is_deleted(&message.id) || self.processed.contains(&message.id) {
                continue;
            }
            let directive = self.prefixes.classify(&message.content);
            if directive.kind() != self.kind {
                continue;
            }
            self.processed.insert(&message.id);
            return Some(ScannedDirective {
                message: message.clone(),
                payload: directive.into_payload(),
            });
        }
        None
    }

    /// Every new message of this scanner's kind, for overlays that act on
    /// all of them.
    pub fn drain_all(&mut self, store: &MessageStore) -> Vec<ScannedDirective> {
        let fresh = self.cursor.advance(store);
        let mut found = Vec::new();
        for message in fresh {
            if store.is_deleted(&message.id) || self.processed.contains(&message.id) {
                continue;
            }
            let directive = self.prefixes.classify(&message.content);
            if directive.kind() != self.kind {
                continue;
            }
            self.processed.insert(&message.id);
            found.push(ScannedDirective {
                message: message.clone(),
                payload: directive.into_payload(),
            });
        }
        found
    }

    pub fn sweep(&mut self) -> bool {
        self.processed.sweep()
    }
}
