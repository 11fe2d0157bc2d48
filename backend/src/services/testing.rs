use crate::error::{CacheError, CacheResult};
use crate::models::{ChannelProfile, Sentiment, TaggedVideo, Video};
use crate::services::sentiment::SentimentClassifier;
use crate::services::youtube::VideoSearchProvider;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn video(id: &str, title: &str, description: &str) -> Video {
    Video {
        video_id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        channel_id: "chan".to_string(),
        channel_title: "Channel".to_string(),
        thumbnail_url: format!("https://img/{id}.jpg"),
        published_at: "2024-05-01T10:00:00Z".to_string(),
    }
}

/// Scripted provider: fixed results per keyword (or channel id), optional
/// failures and an optional delay on every search.
#[derive(Default)]
pub struct FakeProvider {
    results: Mutex<HashMap<String, Vec<Video>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeProvider {
    pub fn new() -> Self {
        FakeProvider::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        FakeProvider {
            delay: Some(delay),
            ..FakeProvider::default()
        }
    }

    pub fn set_results(&self, keyword: &str, videos: Vec<Video>) {
        self.results
            .lock()
            .unwrap()
            .insert(keyword.to_string(), videos);
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> CacheResult<()> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(CacheError::Transport(format!("scripted failure for {key}")));
        }
        Ok(())
    }

    fn scripted(&self, key: &str, max_results: usize) -> Vec<Video> {
        self.results
            .lock()
            .unwrap()
            .get(key)
            .map(|videos| videos.iter().take(max_results).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VideoSearchProvider for FakeProvider {
    async fn search(&self, keyword: &str, max_results: usize) -> CacheResult<Vec<Video>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check(keyword)?;
        Ok(self.scripted(keyword, max_results))
    }

    async fn video_tags(&self, video_id: &str) -> CacheResult<TaggedVideo> {
        self.check(video_id)?;
        Ok(TaggedVideo {
            video: video(video_id, &format!("Video {video_id}"), ""),
            tags: vec![format!("tag-{video_id}")],
        })
    }

    async fn channel_profile(&self, channel_id: &str) -> CacheResult<ChannelProfile> {
        self.check(channel_id)?;
        Ok(ChannelProfile {
            channel_id: channel_id.to_string(),
            title: format!("Channel {channel_id}"),
            ..ChannelProfile::default()
        })
    }

    async fn channel_videos(
        &self,
        channel_id: &str,
        max_results: usize,
    ) -> CacheResult<Vec<Video>> {
        self.check(channel_id)?;
        Ok(self.scripted(channel_id, max_results))
    }
}

/// Blocks its worker thread for the given time, then answers neutral.
pub struct SlowClassifier(pub Duration);

impl SentimentClassifier for SlowClassifier {
    fn classify(&self, _text: &str) -> Sentiment {
        std::thread::sleep(self.0);
        Sentiment::Neutral
    }
}
