use crate::error::{CacheError, CacheResult};
use crate::models::{ChannelProfile, TaggedVideo, Video};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream video source. Implementations must be cheap to share between
/// sessions; every call is independent.
#[async_trait]
pub trait VideoSearchProvider: Send + Sync {
    /// Newest videos for a keyword, at most `max_results`.
    async fn search(&self, keyword: &str, max_results: usize) -> CacheResult<Vec<Video>>;

    /// The video's details together with its tags.
    async fn video_tags(&self, video_id: &str) -> CacheResult<TaggedVideo>;

    async fn channel_profile(&self, channel_id: &str) -> CacheResult<ChannelProfile>;

    async fn channel_videos(&self, channel_id: &str, max_results: usize)
        -> CacheResult<Vec<Video>>;
}

pub struct YouTubeClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(api_url: &str, api_key: &str, request_timeout: Duration) -> CacheResult<Self> {
        let client = Client::builder()
            .user_agent("tubewatch/0.1")
            .timeout(request_timeout)
            .build()?;
        Ok(YouTubeClient {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, &str)]) -> CacheResult<Value> {
        let mut url = Url::parse(&format!("{}/{endpoint}", self.api_url))?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("key", &self.api_key);

        debug!("GET {}/{endpoint} {:?}", self.api_url, params);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("YouTube API {endpoint} responded with {status}: {body}");
            return Err(CacheError::Transport(format!(
                "YouTube API {endpoint} responded with {status}"
            )));
        }

        Ok(response.json::<Value>().await?)
    }
}

fn video_from_snippet(video_id: &str, snippet: &Value) -> Video {
    Video {
        video_id: video_id.to_string(),
        title: snippet["title"].as_str().unwrap_or("No Title").to_string(),
        description: snippet["description"]
            .as_str()
            .unwrap_or("No Description")
            .to_string(),
        channel_id: snippet["channelId"].as_str().unwrap_or("").to_string(),
        channel_title: snippet["channelTitle"]
            .as_str()
            .unwrap_or("Unknown Channel")
            .to_string(),
        thumbnail_url: snippet["thumbnails"]["default"]["url"]
            .as_str()
            .unwrap_or("")
            .to_string(),
        published_at: snippet["publishedAt"].as_str().unwrap_or("").to_string(),
    }
}

// Documentation: https://developers.google.com/youtube/v3/docs/search
fn parse_search_items(response: &Value) -> Vec<Video> {
    let Some(items) = response["items"].as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let video_id = item["id"]["videoId"].as_str()?;
            Some(video_from_snippet(video_id, &item["snippet"]))
        })
        .collect()
}

fn parse_count(value: &Value) -> i64 {
    value.as_str().unwrap_or("0").parse().unwrap_or(0)
}

#[async_trait]
impl VideoSearchProvider for YouTubeClient {
    async fn search(&self, keyword: &str, max_results: usize) -> CacheResult<Vec<Video>> {
        let max_results = max_results.to_string();
        let response = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("order", "date"),
                    ("maxResults", max_results.as_str()),
                    ("q", keyword),
                ],
            )
            .await?;
        Ok(parse_search_items(&response))
    }

    async fn video_tags(&self, video_id: &str) -> CacheResult<TaggedVideo> {
        let response = self
            .get_json("videos", &[("part", "snippet"), ("id", video_id)])
            .await?;
        let item = &response["items"][0];
        if item.is_null() {
            return Err(CacheError::Transport(format!("no video with id {video_id}")));
        }

        let snippet = &item["snippet"];
        let tags = snippet["tags"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(TaggedVideo {
            video: video_from_snippet(video_id, snippet),
            tags,
        })
    }

    async fn channel_profile(&self, channel_id: &str) -> CacheResult<ChannelProfile> {
        let response = self
            .get_json(
                "channels",
                &[("part", "snippet,statistics"), ("id", channel_id)],
            )
            .await?;
        let channel = &response["items"][0];
        if channel.is_null() {
            return Err(CacheError::Transport(format!(
                "no channel with id {channel_id}"
            )));
        }

        Ok(ChannelProfile {
            channel_id: channel_id.to_string(),
            title: channel["snippet"]["title"].as_str().unwrap_or("").to_string(),
            description: channel["snippet"]["description"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            thumbnail_url: channel["snippet"]["thumbnails"]["default"]["url"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            subscriber_count: parse_count(&channel["statistics"]["subscriberCount"]),
            video_count: parse_count(&channel["statistics"]["videoCount"]),
        })
    }

    async fn channel_videos(
        &self,
        channel_id: &str,
        max_results: usize,
    ) -> CacheResult<Vec<Video>> {
        let max_results = max_results.to_string();
        let response = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("order", "date"),
                    ("channelId", channel_id),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;
        Ok(parse_search_items(&response))
    }
}
