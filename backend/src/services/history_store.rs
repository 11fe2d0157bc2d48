use crate::models::Video;
use crate::services::keyword_history::KeywordHistory;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

type SharedHistory = Arc<Mutex<KeywordHistory>>;

/// Keyword histories of every live session. Each session's history sits
/// behind its own mutex, so work on one session never waits on another.
/// The lock only ever guards in-memory edits; nothing awaits while holding it.
pub struct SessionHistoryStore {
    sessions: DashMap<String, SharedHistory>,
    max_entries: usize,
}

fn lock(history: &Mutex<KeywordHistory>) -> MutexGuard<'_, KeywordHistory> {
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionHistoryStore {
    pub fn new(max_entries: usize) -> Self {
        SessionHistoryStore {
            sessions: DashMap::new(),
            max_entries,
        }
    }

    fn session(&self, session_id: &str) -> SharedHistory {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeywordHistory::new(self.max_entries))))
            .clone()
    }

    fn existing(&self, session_id: &str) -> Option<SharedHistory> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Inserts or replaces the keyword's results. Returns the keyword that
    /// had to be evicted to stay within `max_entries`, if any.
    pub fn add_search_result(
        &self,
        session_id: &str,
        keyword: &str,
        videos: Vec<Video>,
    ) -> Option<String> {
        let history = self.session(session_id);
        let evicted = lock(&history).insert(keyword, videos);
        if let Some(old) = &evicted {
            info!("Session {session_id}: evicted keyword '{old}' to make room for '{keyword}'");
        }
        evicted
    }

    /// Snapshot copy of the session's history; empty for unknown sessions.
    pub fn get_history(&self, session_id: &str) -> KeywordHistory {
        match self.existing(session_id) {
            Some(history) => lock(&history).clone(),
            None => KeywordHistory::new(self.max_entries),
        }
    }

    pub fn videos_for_sentiment(&self, session_id: &str, limit: usize) -> Vec<Video> {
        match self.existing(session_id) {
            Some(history) => lock(&history).flatten(limit),
            None => Vec::new(),
        }
    }

    /// Folds newly discovered videos into a keyword that is still tracked.
    /// Unknown sessions and evicted keywords are left untouched.
    pub fn merge_new_videos(
        &self,
        session_id: &str,
        keyword: &str,
        new_videos: &[Video],
        max_videos: usize,
    ) -> bool {
        let Some(history) = self.existing(session_id) else {
            debug!("Session {session_id} is gone; dropping {} videos", new_videos.len());
            return false;
        };
        let merged = lock(&history).prepend(keyword, new_videos, max_videos);
        if !merged {
            debug!("Session {session_id}: keyword '{keyword}' no longer tracked; skipping merge");
        }
        merged
    }

    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
