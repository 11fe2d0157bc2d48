//! Per-session polling. One `PollingCoordinator` owns one session's
//! `SessionState` and processes its commands strictly in arrival order, so
//! that state needs no lock. Fetches for the tracked keywords run
//! concurrently, but everything they produce is folded back in here.

use crate::models::{OutboundMessage, Video, WordCount};
use crate::services::aggregation;
use crate::services::history_store::SessionHistoryStore;
use crate::services::session_state::SessionState;
use crate::services::supervisor::{ChildContext, ChildExit, ChildSpec};
use crate::services::youtube::VideoSearchProvider;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug)]
pub enum CoordinatorCommand {
    FetchTick,
    Track {
        keyword: String,
        videos: Vec<Video>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
    WordStats {
        reply: oneshot::Sender<Vec<WordCount>>,
    },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Created,
    Active,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot {
    pub keywords: Vec<String>,
    pub seen_videos: usize,
    pub word_stats: Vec<WordCount>,
    pub phase: CoordinatorPhase,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub batch_size: usize,
    pub fetch_start_delay: Duration,
    pub heartbeat_interval: Duration,
    pub max_videos_per_keyword: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            batch_size: 10,
            fetch_start_delay: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            max_videos_per_keyword: 50,
        }
    }
}

pub struct PollingCoordinator {
    session_id: String,
    provider: Arc<dyn VideoSearchProvider>,
    store: Arc<SessionHistoryStore>,
    output: broadcast::Sender<OutboundMessage>,
    settings: CoordinatorSettings,
    state: SessionState,
    word_stats: Vec<WordCount>,
    phase: CoordinatorPhase,
    activates_at: Instant,
}

impl PollingCoordinator {
    /// Builds a coordinator whose state is seeded from whatever the store
    /// currently holds for the session.
    pub fn new(
        session_id: &str,
        provider: Arc<dyn VideoSearchProvider>,
        store: Arc<SessionHistoryStore>,
        output: broadcast::Sender<OutboundMessage>,
        settings: CoordinatorSettings,
    ) -> Self {
        let state = SessionState::seeded(store.get_history(session_id));
        let mut coordinator = PollingCoordinator {
            session_id: session_id.to_string(),
            provider,
            store,
            output,
            settings,
            state,
            word_stats: Vec::new(),
            phase: CoordinatorPhase::Created,
            activates_at: Instant::now() + settings.fetch_start_delay,
        };
        coordinator.refresh_word_stats();
        coordinator
    }

    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<CoordinatorCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ChildExit {
        let period = self.settings.heartbeat_interval;
        let mut heartbeat = interval_at(self.activates_at + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            "Session {}: coordinator running with {} tracked keywords",
            self.session_id,
            self.state.keywords().len()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                command = inbox.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command, &mut shutdown).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => self.emit(OutboundMessage::Heartbeat),
            }
        }

        self.phase = CoordinatorPhase::Stopped;
        info!("Session {}: coordinator stopped", self.session_id);
        ChildExit::Completed
    }

    /// Applies one command. Returns false once the coordinator should stop.
    async fn handle(
        &mut self,
        command: CoordinatorCommand,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        match command {
            CoordinatorCommand::FetchTick => {
                if self.phase == CoordinatorPhase::Created {
                    if Instant::now() < self.activates_at {
                        debug!("Session {}: tick before start delay, ignored", self.session_id);
                        return true;
                    }
                    self.phase = CoordinatorPhase::Active;
                    info!("Session {}: polling activated", self.session_id);
                }
                self.fetch_cycle(shutdown).await
            }
            CoordinatorCommand::Track { keyword, videos } => {
                if let Some(evicted) = self.state.track(&keyword, videos) {
                    debug!("Session {}: stopped tracking '{evicted}'", self.session_id);
                }
                self.refresh_word_stats();
                true
            }
            CoordinatorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                true
            }
            CoordinatorCommand::WordStats { reply } => {
                let _ = reply.send(self.word_stats.clone());
                true
            }
            CoordinatorCommand::Stop => false,
        }
    }

    async fn fetch_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let keywords = self.state.keywords();
        if keywords.is_empty() {
            return true;
        }

        let batch_size = self.settings.batch_size;
        let fetches = join_all(keywords.iter().map(|keyword| {
            let provider = self.provider.clone();
            async move { provider.search(keyword, batch_size).await }
        }));

        let results = tokio::select! {
            results = fetches => results,
            _ = shutdown.changed() => {
                debug!("Session {}: torn down mid-fetch, dropping results", self.session_id);
                return false;
            }
        };

        let mut changed = false;
        for (keyword, result) in keywords.iter().zip(results) {
            let fetched = match result {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("Session {}: fetch for '{keyword}' failed: {e}", self.session_id);
                    continue;
                }
            };

            let new_videos = self.state.admit(keyword, fetched);
            if new_videos.is_empty() {
                continue;
            }
            changed = true;

            self.store.merge_new_videos(
                &self.session_id,
                keyword,
                &new_videos,
                self.settings.max_videos_per_keyword,
            );
            info!(
                "Session {}: {} new videos for '{keyword}'",
                self.session_id,
                new_videos.len()
            );
            for video in &new_videos {
                self.emit(OutboundMessage::video(keyword, video));
            }
        }

        if changed {
            self.refresh_word_stats();
        }
        true
    }

    fn refresh_word_stats(&mut self) {
        let videos = self.state.history().flatten(usize::MAX);
        self.word_stats = aggregation::word_stats(&videos);
    }

    fn emit(&self, message: OutboundMessage) {
        // no subscriber means no open stream; the message is simply dropped
        let _ = self.output.send(message);
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            keywords: self.state.keywords(),
            seen_videos: self.state.seen_count(),
            word_stats: self.word_stats.clone(),
            phase: self.phase,
        }
    }
}

/// How the supervisor (re)creates a session's coordinator.
pub fn child_spec(
    provider: Arc<dyn VideoSearchProvider>,
    store: Arc<SessionHistoryStore>,
    output: broadcast::Sender<OutboundMessage>,
    settings: CoordinatorSettings,
) -> ChildSpec {
    Arc::new(move |ctx: ChildContext| {
        let coordinator = PollingCoordinator::new(
            &ctx.id,
            provider.clone(),
            store.clone(),
            output.clone(),
            settings,
        );
        coordinator.run(ctx.inbox, ctx.shutdown).boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{video, FakeProvider};

    const SESSION: &str = "s1";

    fn immediate() -> CoordinatorSettings {
        CoordinatorSettings {
            fetch_start_delay: Duration::ZERO,
            ..CoordinatorSettings::default()
        }
    }

    struct Harness {
        provider: Arc<FakeProvider>,
        store: Arc<SessionHistoryStore>,
        output: broadcast::Receiver<OutboundMessage>,
        coordinator: PollingCoordinator,
        shutdown_tx: watch::Sender<bool>,
        shutdown: watch::Receiver<bool>,
    }

    fn harness(settings: CoordinatorSettings) -> Harness {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(SessionHistoryStore::new(10));
        let (output_tx, output) = broadcast::channel(64);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let coordinator =
            PollingCoordinator::new(SESSION, provider.clone(), store.clone(), output_tx, settings);
        Harness {
            provider,
            store,
            output,
            coordinator,
            shutdown_tx,
            shutdown,
        }
    }

    impl Harness {
        async fn track(&mut self, keyword: &str, videos: Vec<Video>) {
            self.store.add_search_result(SESSION, keyword, videos.clone());
            let command = CoordinatorCommand::Track {
                keyword: keyword.to_string(),
                videos,
            };
            assert!(self.coordinator.handle(command, &mut self.shutdown).await);
        }

        async fn tick(&mut self) {
            let command = CoordinatorCommand::FetchTick;
            assert!(self.coordinator.handle(command, &mut self.shutdown).await);
        }

        fn drain_video_ids(&mut self) -> Vec<(String, String)> {
            let mut ids = Vec::new();
            while let Ok(message) = self.output.try_recv() {
                if let OutboundMessage::Video {
                    keyword, video_id, ..
                } = message
                {
                    ids.push((keyword, video_id));
                }
            }
            ids
        }
    }

    fn pair(keyword: &str, id: &str) -> (String, String) {
        (keyword.to_string(), id.to_string())
    }

    #[tokio::test]
    async fn repeated_results_are_emitted_once() {
        let mut h = harness(immediate());
        h.track("rust", vec![]).await;
        h.provider
            .set_results("rust", vec![video("v1", "", ""), video("v2", "", "")]);

        h.tick().await;
        assert_eq!(
            h.drain_video_ids(),
            vec![pair("rust", "v1"), pair("rust", "v2")]
        );

        h.tick().await;
        assert!(h.drain_video_ids().is_empty());
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn delta_replaces_entry_while_store_accumulates() {
        let mut h = harness(immediate());
        h.track("rust", vec![video("v0", "", "")]).await;
        h.provider
            .set_results("rust", vec![video("v1", "", ""), video("v0", "", "")]);

        h.tick().await;

        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.seen_videos, 2);
        assert_eq!(
            h.coordinator.state.history().get("rust"),
            Some(&[video("v1", "", "")][..])
        );
        let stored: Vec<String> = h
            .store
            .get_history(SESSION)
            .get("rust")
            .unwrap()
            .iter()
            .map(|v| v.video_id.clone())
            .collect();
        assert_eq!(stored, vec!["v1", "v0"]);
    }

    #[tokio::test]
    async fn failing_keyword_does_not_block_the_others() {
        let mut h = harness(immediate());
        h.track("broken", vec![]).await;
        h.track("fine", vec![]).await;
        h.provider.fail("broken");
        h.provider.set_results("fine", vec![video("f1", "", "")]);

        h.tick().await;

        assert_eq!(h.drain_video_ids(), vec![pair("fine", "f1")]);
        assert_eq!(h.coordinator.phase, CoordinatorPhase::Active);
    }

    #[tokio::test]
    async fn word_stats_follow_the_current_history() {
        let mut h = harness(immediate());
        h.track("rust", vec![video("v0", "Rust async", "")]).await;
        assert!(h.coordinator.word_stats.is_empty());

        h.provider
            .set_results("rust", vec![video("v1", "Rust traits", "")]);
        h.tick().await;
        // history now only holds the delta
        assert!(h.coordinator.word_stats.is_empty());

        h.provider.set_results(
            "rust",
            vec![video("v2", "Rust book", ""), video("v3", "Rust macros", "")],
        );
        h.tick().await;
        assert_eq!(h.coordinator.word_stats[0].word, "rust");
        assert_eq!(h.coordinator.word_stats[0].count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_before_start_delay_are_ignored() {
        let mut h = harness(CoordinatorSettings::default());
        h.track("rust", vec![]).await;

        h.tick().await;
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.coordinator.phase, CoordinatorPhase::Created);

        tokio::time::advance(Duration::from_secs(10)).await;
        h.tick().await;
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.coordinator.phase, CoordinatorPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_starts_one_period_after_activation() {
        let h = harness(CoordinatorSettings::default());
        let mut output = h.output;
        let (_inbox_tx, inbox) = mpsc::channel(8);
        let started = Instant::now();
        let task = tokio::spawn(h.coordinator.run(inbox, h.shutdown));

        assert_eq!(output.recv().await.unwrap(), OutboundMessage::Heartbeat);
        assert_eq!(started.elapsed(), Duration::from_secs(25));
        assert_eq!(output.recv().await.unwrap(), OutboundMessage::Heartbeat);
        assert_eq!(started.elapsed(), Duration::from_secs(40));

        h.shutdown_tx.send(true).unwrap();
        assert!(matches!(task.await.unwrap(), ChildExit::Completed));
    }

    #[tokio::test]
    async fn stop_command_ends_the_run_loop() {
        let h = harness(immediate());
        let (inbox_tx, inbox) = mpsc::channel(8);
        let task = tokio::spawn(h.coordinator.run(inbox, h.shutdown));

        inbox_tx.send(CoordinatorCommand::Stop).await.unwrap();
        assert!(matches!(task.await.unwrap(), ChildExit::Completed));
    }

    #[tokio::test]
    async fn snapshot_and_word_stats_answer_over_the_inbox() {
        let h = harness(immediate());
        let (inbox_tx, inbox) = mpsc::channel(8);
        let _task = tokio::spawn(h.coordinator.run(inbox, h.shutdown));

        inbox_tx
            .send(CoordinatorCommand::Track {
                keyword: "rust".into(),
                videos: vec![video("v1", "Rust one", ""), video("v2", "Rust two", "")],
            })
            .await
            .unwrap();

        let (reply, answer) = oneshot::channel();
        inbox_tx
            .send(CoordinatorCommand::Snapshot { reply })
            .await
            .unwrap();
        let snapshot = answer.await.unwrap();
        assert_eq!(snapshot.keywords, vec!["rust"]);
        assert_eq!(snapshot.seen_videos, 2);
        assert_eq!(snapshot.phase, CoordinatorPhase::Created);

        let (reply, answer) = oneshot::channel();
        inbox_tx
            .send(CoordinatorCommand::WordStats { reply })
            .await
            .unwrap();
        assert_eq!(
            answer.await.unwrap(),
            vec![WordCount {
                word: "rust".into(),
                count: 2
            }]
        );
    }

    #[tokio::test]
    async fn cleared_session_is_not_resurrected_by_a_late_delta() {
        let mut h = harness(immediate());
        h.track("rust", vec![]).await;
        h.store.clear(SESSION);
        h.provider.set_results("rust", vec![video("v1", "", "")]);

        h.tick().await;

        assert!(h.store.get_history(SESSION).is_empty());
        assert_eq!(h.store.session_count(), 0);
    }

    #[tokio::test]
    async fn evicted_keyword_is_no_longer_polled() {
        let mut h = harness(immediate());
        for i in 0..11 {
            h.track(&format!("kw{i}"), vec![]).await;
        }

        h.tick().await;

        assert_eq!(h.provider.calls(), 10);
        assert!(!h.coordinator.snapshot().keywords.contains(&"kw0".to_string()));
    }

    #[tokio::test]
    async fn seeded_from_store_history() {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(SessionHistoryStore::new(10));
        store.add_search_result(SESSION, "rust", vec![video("v1", "", "")]);
        let (output_tx, mut output) = broadcast::channel(8);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);
        let mut coordinator =
            PollingCoordinator::new(SESSION, provider.clone(), store, output_tx, immediate());

        provider.set_results("rust", vec![video("v1", "", "")]);
        coordinator
            .handle(CoordinatorCommand::FetchTick, &mut shutdown)
            .await;

        assert_eq!(coordinator.snapshot().keywords, vec!["rust"]);
        assert!(output.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_during_fetch_discards_results() {
        let provider = Arc::new(FakeProvider::with_delay(Duration::from_secs(5)));
        let store = Arc::new(SessionHistoryStore::new(10));
        store.add_search_result(SESSION, "rust", vec![]);
        provider.set_results("rust", vec![video("v1", "", "")]);
        let (output_tx, mut output) = broadcast::channel(8);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let coordinator =
            PollingCoordinator::new(SESSION, provider.clone(), store.clone(), output_tx, immediate());
        let (inbox_tx, inbox) = mpsc::channel(8);
        let task = tokio::spawn(coordinator.run(inbox, shutdown));

        inbox_tx.send(CoordinatorCommand::FetchTick).await.unwrap();
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();

        assert!(matches!(task.await.unwrap(), ChildExit::Completed));
        assert!(output.try_recv().is_err());
        assert_eq!(store.get_history(SESSION).get("rust"), Some(&[][..]));
    }
}
