//! One-for-one supervision of session coordinators.
//!
//! Every child runs as its own task. When it ends, its exit value decides
//! what happens next: `Completed` retires it, `Failed` restarts it while the
//! child is within its restart budget, `Fatal` retires it and reports. A
//! child that burns through the budget is reported as exhausted and left
//! down; siblings are never touched.

use crate::error::{CacheError, CacheResult};
use crate::services::coordinator::CoordinatorCommand;
use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

const INBOX_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 128;

#[derive(Debug)]
pub enum ChildExit {
    Completed,
    Failed(String),
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionEvent {
    Started { child: String },
    Restarted { child: String, attempt: usize },
    Exhausted { child: String, reason: String },
    Fatal { child: String, reason: String },
    Stopped { child: String },
}

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub limit: usize,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// What a child gets handed when it is (re)started.
pub struct ChildContext {
    pub id: String,
    pub inbox: mpsc::Receiver<CoordinatorCommand>,
    pub shutdown: watch::Receiver<bool>,
}

pub type ChildSpec = Arc<dyn Fn(ChildContext) -> BoxFuture<'static, ChildExit> + Send + Sync>;

/// Sliding-window failure counter for one child.
#[derive(Debug)]
struct RestartTracker {
    policy: RestartPolicy,
    restarts: VecDeque<Instant>,
}

impl RestartTracker {
    fn new(policy: RestartPolicy) -> Self {
        RestartTracker {
            policy,
            restarts: VecDeque::new(),
        }
    }

    /// Records a failure at `now`; true if another restart fits the budget.
    fn allow_restart(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.restarts.front() {
            if now.duration_since(*oldest) >= self.policy.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if self.restarts.len() >= self.policy.limit {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    fn recent(&self) -> usize {
        self.restarts.len()
    }
}

struct ChildEntry {
    generation: u64,
    spec: ChildSpec,
    inbox: mpsc::Sender<CoordinatorCommand>,
    shutdown: watch::Sender<bool>,
    restarts: RestartTracker,
}

struct ChildReport {
    id: String,
    generation: u64,
    exit: ChildExit,
}

pub struct Supervisor {
    children: Mutex<HashMap<String, ChildEntry>>,
    exits: mpsc::UnboundedSender<ChildReport>,
    events: broadcast::Sender<SupervisionEvent>,
    policy: RestartPolicy,
    next_generation: AtomicU64,
}

impl Supervisor {
    /// Creates the supervisor and its reconciliation loop. Must be called
    /// from inside a tokio runtime.
    pub fn start(policy: RestartPolicy) -> Arc<Self> {
        let (exits, reports) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let supervisor = Arc::new(Supervisor {
            children: Mutex::new(HashMap::new()),
            exits,
            events,
            policy,
            next_generation: AtomicU64::new(0),
        });
        tokio::spawn(Self::reconcile(Arc::downgrade(&supervisor), reports));
        info!(
            "Supervisor started (restart limit {} per {:?})",
            policy.limit, policy.window
        );
        supervisor
    }

    async fn reconcile(supervisor: Weak<Self>, mut reports: mpsc::UnboundedReceiver<ChildReport>) {
        while let Some(report) = reports.recv().await {
            let Some(supervisor) = supervisor.upgrade() else {
                break;
            };
            supervisor.handle_exit(report);
        }
        debug!("Supervisor reconciliation loop finished");
    }

    fn lock_children(&self) -> MutexGuard<'_, HashMap<String, ChildEntry>> {
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SupervisionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn launch(&self, id: &str, spec: ChildSpec, restarts: RestartTracker) -> ChildEntry {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let child = spec(ChildContext {
            id: id.to_string(),
            inbox: inbox_rx,
            shutdown: shutdown_rx,
        });
        let handle = tokio::spawn(child);

        let exits = self.exits.clone();
        let child_id = id.to_string();
        tokio::spawn(async move {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(e) if e.is_panic() => ChildExit::Failed(format!("panicked: {e}")),
                Err(e) => ChildExit::Failed(e.to_string()),
            };
            let _ = exits.send(ChildReport {
                id: child_id,
                generation,
                exit,
            });
        });

        ChildEntry {
            generation,
            spec,
            inbox: inbox_tx,
            shutdown: shutdown_tx,
            restarts,
        }
    }

    /// Starts a child under `id`. Returns false if one is already running.
    pub fn spawn_child(&self, id: &str, spec: ChildSpec) -> bool {
        let mut children = self.lock_children();
        if children.contains_key(id) {
            return false;
        }
        let entry = self.launch(id, spec, RestartTracker::new(self.policy));
        children.insert(id.to_string(), entry);
        drop(children);

        info!("Started child {id}");
        self.emit(SupervisionEvent::Started {
            child: id.to_string(),
        });
        true
    }

    fn handle_exit(&self, report: ChildReport) {
        let ChildReport {
            id,
            generation,
            exit,
        } = report;

        let mut children = self.lock_children();
        match children.get(&id) {
            Some(entry) if entry.generation == generation => {}
            // stopped on purpose, or an older incarnation
            _ => return,
        }
        let Some(mut entry) = children.remove(&id) else {
            return;
        };

        let event = match exit {
            ChildExit::Completed => {
                info!("Child {id} completed");
                SupervisionEvent::Stopped { child: id }
            }
            ChildExit::Fatal(reason) => {
                error!("Child {id} failed fatally, not restarting: {reason}");
                SupervisionEvent::Fatal { child: id, reason }
            }
            ChildExit::Failed(reason) => {
                if entry.restarts.allow_restart(Instant::now()) {
                    let attempt = entry.restarts.recent();
                    warn!("Child {id} failed ({reason}); restart {attempt}/{}", self.policy.limit);
                    let restarted = self.launch(&id, entry.spec.clone(), entry.restarts);
                    children.insert(id.clone(), restarted);
                    SupervisionEvent::Restarted { child: id, attempt }
                } else {
                    let exhausted = CacheError::SupervisionExhausted {
                        child: id.clone(),
                        limit: self.policy.limit,
                        window: self.policy.window,
                    };
                    error!("{exhausted}; last failure: {reason}");
                    SupervisionEvent::Exhausted { child: id, reason }
                }
            }
        };
        drop(children);
        self.emit(event);
    }

    fn inbox(&self, id: &str) -> CacheResult<mpsc::Sender<CoordinatorCommand>> {
        self.lock_children()
            .get(id)
            .map(|entry| entry.inbox.clone())
            .ok_or_else(|| CacheError::SessionUnavailable(id.to_string()))
    }

    /// Queues a command on the child's private inbox, waiting at most
    /// `wait` for room.
    pub async fn send(
        &self,
        id: &str,
        command: CoordinatorCommand,
        wait: Duration,
    ) -> CacheResult<()> {
        let inbox = self.inbox(id)?;
        match inbox.send_timeout(command, wait).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!("Child {id} inbox stayed full for {wait:?}");
                Err(CacheError::Timeout(wait))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(CacheError::SessionUnavailable(id.to_string()))
            }
        }
    }

    /// Request/response round trip to a child, bounded by `wait`.
    pub async fn ask<T, F>(&self, id: &str, make: F, wait: Duration) -> CacheResult<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    {
        let inbox = self.inbox(id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let round_trip = async {
            inbox
                .send(make(reply_tx))
                .await
                .map_err(|_| CacheError::SessionUnavailable(id.to_string()))?;
            reply_rx
                .await
                .map_err(|_| CacheError::SessionUnavailable(id.to_string()))
        };

        match tokio::time::timeout(wait, round_trip).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Child {id} did not answer within {wait:?}");
                Err(CacheError::Timeout(wait))
            }
        }
    }

    /// Relays one fetch tick to every child. A child whose inbox is full
    /// simply misses this tick.
    pub fn tick(&self) {
        let inboxes: Vec<(String, mpsc::Sender<CoordinatorCommand>)> = self
            .lock_children()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.inbox.clone()))
            .collect();

        debug!("Relaying fetch tick to {} children", inboxes.len());
        for (id, inbox) in inboxes {
            if let Err(mpsc::error::TrySendError::Full(_)) =
                inbox.try_send(CoordinatorCommand::FetchTick)
            {
                warn!("Child {id} is backed up; skipping this tick");
            }
        }
    }

    /// Stops and forgets a child. It will not be restarted.
    pub fn stop(&self, id: &str) -> bool {
        let Some(entry) = self.lock_children().remove(id) else {
            return false;
        };
        let _ = entry.shutdown.send(true);
        let _ = entry.inbox.try_send(CoordinatorCommand::Stop);

        info!("Stopped child {id}");
        self.emit(SupervisionEvent::Stopped {
            child: id.to_string(),
        });
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock_children().contains_key(id)
    }

    pub fn child_count(&self) -> usize {
        self.lock_children().len()
    }

    /// Operator-facing stream of supervision events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisionEvent> {
        self.events.subscribe()
    }
}
