use crate::models::{KeywordResults, Video};
use std::collections::VecDeque;

/// Insertion-ordered keyword -> videos table holding at most `capacity`
/// keywords. Inserting a new keyword at capacity evicts the oldest-inserted
/// one; reads never affect eviction order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHistory {
    entries: VecDeque<(String, Vec<Video>)>,
    capacity: usize,
}

impl KeywordHistory {
    pub fn new(capacity: usize) -> Self {
        KeywordHistory {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the evicted keyword when a new keyword pushed the oldest one out.
    /// Updating an existing keyword keeps its position and never evicts.
    pub fn insert(&mut self, keyword: &str, videos: Vec<Video>) -> Option<String> {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(k, _)| k == keyword) {
            *existing = videos;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|(k, _)| k)
        } else {
            None
        };
        self.entries.push_back((keyword.to_string(), videos));
        evicted
    }

    /// Puts `new_videos` in front of the keyword's current videos, keeping at
    /// most `cap` of them. Returns false if the keyword is not tracked.
    pub fn prepend(&mut self, keyword: &str, new_videos: &[Video], cap: usize) -> bool {
        let Some((_, existing)) = self.entries.iter_mut().find(|(k, _)| k == keyword) else {
            return false;
        };

        let mut merged: Vec<Video> = new_videos.to_vec();
        merged.extend(
            existing
                .drain(..)
                .filter(|video| !new_videos.contains(video)),
        );
        merged.truncate(cap.max(1));
        *existing = merged;
        true
    }

    pub fn get(&self, keyword: &str) -> Option<&[Video]> {
        self.entries
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, videos)| videos.as_slice())
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == keyword)
    }

    pub fn keywords(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Video])> {
        self.entries
            .iter()
            .map(|(k, videos)| (k.as_str(), videos.as_slice()))
    }

    /// All videos in keyword-insertion order, then per-keyword order, cut at `limit`.
    pub fn flatten(&self, limit: usize) -> Vec<Video> {
        self.entries
            .iter()
            .flat_map(|(_, videos)| videos.iter())
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn to_results(&self) -> Vec<KeywordResults> {
        self.entries
            .iter()
            .map(|(keyword, videos)| KeywordResults {
                keyword: keyword.clone(),
                videos: videos.clone(),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
