// Bounded, deduplicating notification cache behind the polling
// `/{resource}/notifications` endpoint.
//
// Identity is (id, type). A re-delivered notification replaces the cached
// one only when its lastModified is strictly newer. When full, the entry
// inserted first is evicted regardless of its date.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dispatch::Notification;

/// What `enqueue` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Added as a new identity.
    Inserted,
    /// Replaced an older entry with the same identity.
    Replaced,
    /// An entry with the same identity and an equal or newer date exists.
    Stale,
    /// lastModified missing or not RFC3339.
    Rejected,
}

#[derive(Debug)]
pub struct NotificationCache {
    capacity: usize,
    entries: Mutex<VecDeque<Notification>>,
}

impl NotificationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueue(&self, n: Notification) -> Enqueued {
        let Some(incoming) = n.last_modified_at() else {
            warn!(
                id = %n.id,
                last_modified = %n.last_modified,
                "Ignoring notification with unparseable lastModified"
            );
            return Enqueued::Rejected;
        };

        let mut entries = self.entries.lock();
        let mut outcome = Enqueued::Inserted;

        if let Some(pos) = entries
            .iter()
            .position(|e| e.id == n.id && e.kind == n.kind)
        {
            // An existing entry with a malformed date counts as older.
            let existing_is_older = entries[pos]
                .last_modified_at()
                .map_or(true, |existing| existing < incoming);
            if !existing_is_older {
                debug!(id = %n.id, "Ignoring notification no newer than the cached one");
                return Enqueued::Stale;
            }
            entries.remove(pos);
            outcome = Enqueued::Replaced;
        }

        if self.capacity == 0 {
            return outcome;
        }
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(n);
        outcome
    }

    /// Snapshot in insertion order, oldest first.
    pub fn items(&self) -> Vec<Notification> {
        self.entries.lock().iter().cloned().collect()
    }
}
