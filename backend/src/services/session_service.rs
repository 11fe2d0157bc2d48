use crate::config::Settings;
use crate::error::{CacheError, CacheResult};
use crate::models::{
    AggregateSnapshot, ChannelProfileResponse, KeywordResults, OutboundMessage, SearchResponse,
    SessionKeywordsResponse, Video, WordStatsResponse,
};
use crate::services::aggregation;
use crate::services::coordinator::{self, CoordinatorCommand};
use crate::services::history_store::SessionHistoryStore;
use crate::services::sentiment::SentimentClassifier;
use crate::services::supervisor::{SupervisionEvent, Supervisor};
use crate::services::youtube::VideoSearchProvider;
use crate::utils::normalize_keyword;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const OUTPUT_CAPACITY: usize = 256;
const CHANNEL_VIDEO_COUNT: usize = 10;

type SessionOutputs = DashMap<String, broadcast::Sender<OutboundMessage>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateScope {
    Keyword(String),
    Overall,
}

/// Entry point for request handlers. Owns the shared history store, one
/// output channel per session and the wiring between sessions and their
/// supervised coordinators.
pub struct SessionService {
    store: Arc<SessionHistoryStore>,
    supervisor: Arc<Supervisor>,
    provider: Arc<dyn VideoSearchProvider>,
    classifier: Arc<dyn SentimentClassifier>,
    outputs: Arc<SessionOutputs>,
    settings: Settings,
}

impl SessionService {
    pub fn new(
        provider: Arc<dyn VideoSearchProvider>,
        classifier: Arc<dyn SentimentClassifier>,
        supervisor: Arc<Supervisor>,
        settings: Settings,
    ) -> Self {
        let outputs = Arc::new(DashMap::new());
        forward_supervision(&supervisor, outputs.clone());
        SessionService {
            store: Arc::new(SessionHistoryStore::new(settings.max_history_entries)),
            supervisor,
            provider,
            classifier,
            outputs,
            settings,
        }
    }

    fn output(&self, session_id: &str) -> broadcast::Sender<OutboundMessage> {
        self.outputs
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(OUTPUT_CAPACITY).0)
            .clone()
    }

    /// Makes sure the session has a running coordinator.
    pub fn ensure_coordinator(&self, session_id: &str) {
        if self.supervisor.contains(session_id) {
            return;
        }
        let spec = coordinator::child_spec(
            self.provider.clone(),
            self.store.clone(),
            self.output(session_id),
            self.settings.coordinator(),
        );
        if self.supervisor.spawn_child(session_id, spec) {
            debug!("Session {session_id}: coordinator spawned");
        }
    }

    /// Stores the keyword's results and hands them to the session's
    /// coordinator for polling. Returns the keyword evicted to make room.
    pub async fn record_search(
        &self,
        session_id: &str,
        keyword: &str,
        videos: Vec<Video>,
    ) -> CacheResult<Option<String>> {
        let keyword = normalize_keyword(keyword)?;
        let evicted = self
            .store
            .add_search_result(session_id, &keyword, videos.clone());

        self.ensure_coordinator(session_id);
        let track = CoordinatorCommand::Track {
            keyword: keyword.clone(),
            videos,
        };
        let wait = self.settings.aggregation_timeout;
        if let Err(e) = self.supervisor.send(session_id, track, wait).await {
            // the store already has it; a restarted coordinator seeds from there
            warn!("Session {session_id}: could not hand '{keyword}' to its coordinator: {e}");
        }
        Ok(evicted)
    }

    pub async fn search(&self, session_id: &str, query: &str) -> CacheResult<SearchResponse> {
        let keyword = normalize_keyword(query)?;
        let fetched = self
            .provider
            .search(&keyword, self.settings.sentiment_sample_size)
            .await?;
        info!(
            "Session {session_id}: '{keyword}' returned {} videos",
            fetched.len()
        );

        let shown: Vec<Video> = fetched
            .iter()
            .take(self.settings.batch_size)
            .cloned()
            .collect();
        self.record_search(session_id, &keyword, shown).await?;

        let history = self.store.get_history(session_id);
        let shown_videos = history.flatten(usize::MAX);
        let sentiments = aggregation::individual_sentiments(self.classifier.as_ref(), &shown_videos);
        let overall = self.get_aggregates(session_id, AggregateScope::Overall).await?;

        Ok(SearchResponse {
            keyword,
            history: history.to_results(),
            sentiments,
            overall_sentiment: overall.sentiment,
        })
    }

    /// Word statistics over a fresh, larger sample for one keyword.
    pub async fn word_stats_for(
        &self,
        session_id: &str,
        keyword: &str,
    ) -> CacheResult<WordStatsResponse> {
        let keyword = normalize_keyword(keyword)?;
        let fetched = self
            .provider
            .search(&keyword, self.settings.word_stats_sample_size)
            .await?;
        let word_stats = aggregation::word_stats(&fetched);
        self.record_search(session_id, &keyword, fetched).await?;

        Ok(WordStatsResponse {
            keyword,
            word_stats,
        })
    }

    pub fn get_history(&self, session_id: &str) -> Vec<KeywordResults> {
        self.store.get_history(session_id).to_results()
    }

    pub async fn get_aggregates(
        &self,
        session_id: &str,
        scope: AggregateScope,
    ) -> CacheResult<AggregateSnapshot> {
        let videos = match &scope {
            AggregateScope::Keyword(keyword) => {
                let keyword = normalize_keyword(keyword)?;
                self.store
                    .get_history(session_id)
                    .get(&keyword)
                    .map(<[Video]>::to_vec)
                    .unwrap_or_default()
            }
            AggregateScope::Overall => self
                .store
                .videos_for_sentiment(session_id, self.settings.sentiment_sample_size),
        };

        aggregation::snapshot(
            self.classifier.clone(),
            videos,
            self.settings.aggregation_timeout,
        )
        .await
    }

    /// What the session's coordinator is tracking right now.
    pub async fn session_keywords(&self, session_id: &str) -> CacheResult<SessionKeywordsResponse> {
        let snapshot = self
            .supervisor
            .ask(
                session_id,
                |reply| CoordinatorCommand::Snapshot { reply },
                self.settings.aggregation_timeout,
            )
            .await?;

        Ok(SessionKeywordsResponse {
            keywords: snapshot.keywords,
            seen_videos: snapshot.seen_videos,
            word_stats: snapshot.word_stats,
        })
    }

    /// Tears the session down: coordinator, history and output channel.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let stopped = self.supervisor.stop(session_id);
        let cleared = self.store.clear(session_id);
        let closed = self.outputs.remove(session_id).is_some();
        if stopped || cleared || closed {
            info!(
                "Session {session_id}: cleared ({} sessions left)",
                self.store.session_count()
            );
        }
        stopped || cleared
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<OutboundMessage> {
        let receiver = self.output(session_id).subscribe();
        if !self.store.get_history(session_id).is_empty() {
            self.ensure_coordinator(session_id);
        }
        receiver
    }

    /// Tags of one video, rendered as an outbound message either way.
    pub async fn video_tags(&self, video_id: &str) -> OutboundMessage {
        let wait = self.settings.aggregation_timeout;
        let result = match tokio::time::timeout(wait, self.provider.video_tags(video_id)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(wait)),
        };

        match result {
            Ok(tagged) => OutboundMessage::tags(tagged),
            Err(e) => {
                warn!("Tags for {video_id} unavailable: {e}");
                OutboundMessage::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    pub async fn channel_profile(&self, channel_id: &str) -> CacheResult<ChannelProfileResponse> {
        let wait = self.settings.aggregation_timeout;
        let lookup = async {
            let (profile, videos) = futures::join!(
                self.provider.channel_profile(channel_id),
                self.provider
                    .channel_videos(channel_id, CHANNEL_VIDEO_COUNT)
            );
            Ok::<_, CacheError>(ChannelProfileResponse {
                profile: profile?,
                videos: videos?,
            })
        };

        tokio::time::timeout(wait, lookup).await.map_err(|_| {
            warn!("Channel {channel_id} lookup timed out");
            CacheError::Timeout(wait)
        })?
    }
}

/// Tells a session's stream when its coordinator went down for good.
fn forward_supervision(supervisor: &Supervisor, outputs: Arc<SessionOutputs>) {
    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            let (child, reason) = match events.recv().await {
                Ok(SupervisionEvent::Exhausted { child, reason })
                | Ok(SupervisionEvent::Fatal { child, reason }) => (child, reason),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {skipped} supervision events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if let Some(output) = outputs.get(&child) {
                let _ = output.send(OutboundMessage::Error {
                    message: format!("live updates stopped: {reason}"),
                });
            }
        }
    });
}
