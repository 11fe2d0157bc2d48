//! Stateless aggregates over a video sequence: title word frequencies and
//! description sentiment. Nothing here holds shared state, so any number of
//! callers may use it at once.

use crate::error::{CacheError, CacheResult};
use crate::models::{AggregateSnapshot, Sentiment, Video, WordCount};
use crate::services::sentiment::SentimentClassifier;
use futures::future::join_all;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn normalize_token(token: &str) -> String {
    token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Counts title words across `videos`, keeping words seen more than once.
/// Sorted by count descending; equal counts keep first-occurrence order.
pub fn word_stats(videos: &[Video]) -> Vec<WordCount> {
    let mut first_seen: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();

    for word in videos
        .iter()
        .flat_map(|v| v.title.split_whitespace())
        .map(normalize_token)
        .filter(|w| !w.is_empty())
    {
        let count = counts.entry(word.clone()).or_insert(0);
        if *count == 0 {
            first_seen.push(word);
        }
        *count += 1;
    }

    let mut stats: Vec<WordCount> = first_seen
        .into_iter()
        .filter_map(|word| {
            let count = counts.get(&word).copied().unwrap_or(0);
            (count > 1).then_some(WordCount { word, count })
        })
        .collect();
    // stable sort, so ties stay in first-occurrence order
    stats.sort_by(|a, b| b.count.cmp(&a.count));
    stats
}

pub fn sentiment_of(classifier: &dyn SentimentClassifier, text: &str) -> Sentiment {
    classifier.classify(text)
}

/// Sentiment of each video's description, keyed by video id.
pub fn individual_sentiments(
    classifier: &dyn SentimentClassifier,
    videos: &[Video],
) -> HashMap<String, Sentiment> {
    videos
        .iter()
        .map(|v| (v.video_id.clone(), sentiment_of(classifier, &v.description)))
        .collect()
}

/// Classifies every description concurrently and averages the scores
/// (+1 / -1 / 0). Zero, including a balanced mix, is neutral.
pub async fn average_sentiment(
    classifier: Arc<dyn SentimentClassifier>,
    videos: &[Video],
) -> Sentiment {
    if videos.is_empty() {
        return Sentiment::Neutral;
    }

    let tasks = videos.iter().map(|video| {
        let classifier = classifier.clone();
        let description = video.description.clone();
        tokio::task::spawn_blocking(move || classifier.classify(&description))
    });

    let scores: Vec<i32> = join_all(tasks)
        .await
        .into_iter()
        .map(|outcome| match outcome {
            Ok(sentiment) => sentiment.score(),
            Err(e) => {
                warn!("Sentiment classification task failed: {e}");
                Sentiment::Neutral.score()
            }
        })
        .collect();

    let average = scores.iter().sum::<i32>() as f64 / scores.len() as f64;
    if average > 0.0 {
        Sentiment::Positive
    } else if average < 0.0 {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Word stats plus overall sentiment, bounded by `wait`.
pub async fn snapshot(
    classifier: Arc<dyn SentimentClassifier>,
    videos: Vec<Video>,
    wait: Duration,
) -> CacheResult<AggregateSnapshot> {
    let word_stats = word_stats(&videos);
    let sentiment = tokio::time::timeout(wait, average_sentiment(classifier, &videos))
        .await
        .map_err(|_| {
            warn!("Sentiment aggregation over {} videos timed out", videos.len());
            CacheError::Timeout(wait)
        })?;

    Ok(AggregateSnapshot {
        word_stats,
        sentiment,
        video_count: videos.len(),
    })
}
