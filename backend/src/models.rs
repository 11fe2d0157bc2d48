use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::Responder;
use rocket::{response, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Cursor;

/// A video as returned by the provider. Identity is the provider-assigned
/// `video_id`; every other field is ignored for equality and hashing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_title: String,
    pub thumbnail_url: String,
    pub published_at: String, // ISO8601, as delivered by the API
}

impl PartialEq for Video {
    fn eq(&self, other: &Self) -> bool {
        self.video_id == other.video_id
    }
}

impl Eq for Video {}

impl Hash for Video {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.video_id.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(rename = ":-)")]
    Positive,
    #[serde(rename = ":-(")]
    Negative,
    #[serde(rename = ":-|")]
    Neutral,
}

impl Sentiment {
    pub fn score(self) -> i32 {
        match self {
            Sentiment::Positive => 1,
            Sentiment::Negative => -1,
            Sentiment::Neutral => 0,
        }
    }
}

/// Messages pushed to a session's output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Video {
        keyword: String,
        video_id: String,
        title: String,
        description: String,
        thumbnail_url: String,
        channel_id: String,
        channel_title: String,
    },
    Heartbeat,
    #[serde(rename_all = "camelCase")]
    Tags {
        video_id: String,
        title: String,
        channel_id: String,
        channel_title: String,
        tags: Vec<String>,
    },
    Error { message: String },
}

impl OutboundMessage {
    pub fn video(keyword: &str, video: &Video) -> Self {
        OutboundMessage::Video {
            keyword: keyword.to_string(),
            video_id: video.video_id.clone(),
            title: video.title.clone(),
            description: video.description.clone(),
            thumbnail_url: video.thumbnail_url.clone(),
            channel_id: video.channel_id.clone(),
            channel_title: video.channel_title.clone(),
        }
    }

    pub fn tags(tagged: TaggedVideo) -> Self {
        let TaggedVideo { video, tags } = tagged;
        OutboundMessage::Tags {
            video_id: video.video_id,
            title: video.title,
            channel_id: video.channel_id,
            channel_title: video.channel_title,
            tags,
        }
    }
}

/// A single video looked up by id, together with its uploader-assigned tags.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedVideo {
    pub video: Video,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCount {
    pub word: String,
    pub count: u64,
}

/// Derived view over a video sequence; always recomputed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub word_stats: Vec<WordCount>,
    pub sentiment: Sentiment,
    pub video_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordResults {
    pub keyword: String,
    pub videos: Vec<Video>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub keyword: String,
    pub history: Vec<KeywordResults>,
    pub sentiments: HashMap<String, Sentiment>,
    pub overall_sentiment: Sentiment,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordStatsResponse {
    pub keyword: String,
    pub word_stats: Vec<WordCount>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeywordsResponse {
    pub keywords: Vec<String>,
    pub seen_videos: usize,
    pub word_stats: Vec<WordCount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub subscriber_count: i64,
    pub video_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfileResponse {
    pub profile: ChannelProfile,
    pub videos: Vec<Video>,
}

/// Opaque identifier of a dashboard session, carried in a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip)]
    pub status: u16,
}

impl<'r> Responder<'r, 'static> for ErrorResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = Status::from_code(self.status).unwrap_or(Status::InternalServerError);
        let json = serde_json::to_string(&self).map_err(|_| Status::InternalServerError)?;
        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}
