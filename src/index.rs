//! Append-only per-session log of generated result keys.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::session::SessionKey;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Maps a session to the results it produced, in insertion order.
/// Entries are never removed one at a time, only purged with the session.
#[derive(Clone, Default)]
pub struct SessionIndex {
    logs: Arc<DashMap<SessionKey, Vec<IndexEntry>>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, session: &SessionKey, entry: IndexEntry) {
        self.logs.entry(session.clone()).or_default().push(entry);
    }

    /// Snapshot of the log; re-reading yields the same sequence until the next append
    pub fn list(&self, session: &SessionKey) -> Vec<IndexEntry> {
        self.logs
            .get(session)
            .map(|log| log.value().clone())
            .unwrap_or_default()
    }

    pub fn keys(&self, session: &SessionKey) -> Vec<String> {
        self.logs
            .get(session)
            .map(|log| log.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop the whole log, returning what it held
    pub fn purge(&self, session: &SessionKey) -> Vec<IndexEntry> {
        self.logs
            .remove(session)
            .map(|(_, log)| log)
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.logs.len()
    }
}
