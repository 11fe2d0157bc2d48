use crate::models::Video;
use crate::services::keyword_history::KeywordHistory;
use std::collections::HashSet;

/// Per-session state owned by a single coordinator. Every id present in
/// `history` is also in `seen_video_ids`; ids stay seen after their keyword
/// is evicted so an old video never comes back as new.
#[derive(Debug, Clone)]
pub struct SessionState {
    history: KeywordHistory,
    seen_video_ids: HashSet<String>,
}

impl SessionState {
    #[cfg(test)]
    pub fn new(capacity: usize) -> Self {
        SessionState::seeded(KeywordHistory::new(capacity))
    }

    pub fn seeded(history: KeywordHistory) -> Self {
        let seen_video_ids = history
            .iter()
            .flat_map(|(_, videos)| videos.iter().map(|v| v.video_id.clone()))
            .collect();
        SessionState {
            history,
            seen_video_ids,
        }
    }

    /// Starts (or refreshes) tracking of a keyword with its initial results.
    pub fn track(&mut self, keyword: &str, videos: Vec<Video>) -> Option<String> {
        self.seen_video_ids
            .extend(videos.iter().map(|v| v.video_id.clone()));
        self.history.insert(keyword, videos)
    }

    /// Filters a fetch result down to videos never seen in this session and,
    /// if any remain, makes them the keyword's current entry.
    pub fn admit(&mut self, keyword: &str, fetched: Vec<Video>) -> Vec<Video> {
        if !self.history.contains(keyword) {
            return Vec::new();
        }

        let mut batch_ids = HashSet::new();
        let new_videos: Vec<Video> = fetched
            .into_iter()
            .filter(|v| !self.is_seen(&v.video_id))
            .filter(|v| batch_ids.insert(v.video_id.clone()))
            .collect();

        if new_videos.is_empty() {
            return new_videos;
        }

        self.history.insert(keyword, new_videos.clone());
        self.seen_video_ids
            .extend(new_videos.iter().map(|v| v.video_id.clone()));
        new_videos
    }

    pub fn keywords(&self) -> Vec<String> {
        self.history.keywords()
    }

    pub fn history(&self) -> &KeywordHistory {
        &self.history
    }

    pub fn is_seen(&self, video_id: &str) -> bool {
        self.seen_video_ids.contains(video_id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen_video_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::video;

    #[test]
    fn seeded_state_marks_history_as_seen() {
        let mut history = KeywordHistory::new(10);
        history.insert("rust", vec![video("v1", "", ""), video("v2", "", "")]);

        let state = SessionState::seeded(history);

        assert!(state.is_seen("v1"));
        assert!(state.is_seen("v2"));
        assert_eq!(state.keywords(), vec!["rust"]);
    }

    #[test]
    fn admit_replaces_entry_with_delta_only() {
        let mut state = SessionState::new(10);
        state.track("rust", vec![video("v1", "", ""), video("v2", "", "")]);

        let new_videos = state.admit(
            "rust",
            vec![video("v2", "", ""), video("v3", "", ""), video("v3", "", "")],
        );

        assert_eq!(new_videos, vec![video("v3", "", "")]);
        assert_eq!(state.history().get("rust"), Some(&[video("v3", "", "")][..]));
        assert!(state.is_seen("v1"));
    }

    #[test]
    fn admitting_known_videos_changes_nothing() {
        let mut state = SessionState::new(10);
        state.track("rust", vec![video("v1", "", "")]);

        assert!(state.admit("rust", vec![video("v1", "", "")]).is_empty());
        assert_eq!(state.history().get("rust").map(|v| v.len()), Some(1));
    }

    #[test]
    fn evicted_videos_stay_seen() {
        let mut state = SessionState::new(1);
        state.track("old", vec![video("v1", "", "")]);
        state.track("new", vec![]);

        assert!(!state.history().contains("old"));
        assert!(state.admit("new", vec![video("v1", "", "")]).is_empty());
    }

    #[test]
    fn untracked_keyword_is_not_admitted() {
        let mut state = SessionState::new(10);
        assert!(state.admit("ghost", vec![video("v1", "", "")]).is_empty());
        assert!(state.history().is_empty());
        assert_eq!(state.seen_count(), 0);
    }
}
