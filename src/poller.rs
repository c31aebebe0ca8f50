//! Fan-in poller: drains many project queues onto one output stream.
//!
//! The poller owns one [`ProjectQueue`] per known project and repeatedly
//! scans them for ready work, but only when a consumer is actually
//! waiting: each [`PollerHandle::next`] call registers one request on a
//! bounded channel, and one `poll` pass pops at most one job and satisfies
//! exactly one request, in the order requests arrived. With nobody
//! waiting, `poll` touches nothing, so pending work stays in the store
//! where other nodes can claim it.
//!
//! A poller instance is a single logical control flow (`poll` takes
//! `&mut self` and is not locked against itself); cross-node concurrency
//! safety lives entirely in the store's atomic operations.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::project::ProjectQueue;
use crate::record::ScheduleMessage;
use crate::store::QueueStore;

/// Source of the currently known project names.
///
/// This is the seam where external project discovery (artifact storage,
/// deploy registries) plugs in; the poller re-derives its queue map from
/// it on [`QueuePoller::update_projects`].
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Returns the known project names.
    async fn projects(&self) -> Vec<String>;
}

/// Fixed project list.
pub struct StaticProjects(Vec<String>);

impl StaticProjects {
    /// Creates a registry over a fixed set of projects.
    pub fn new(projects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(projects.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl ProjectRegistry for StaticProjects {
    async fn projects(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Registry that derives projects from the queues existing in the store.
///
/// Useful for inspection tooling: any queue that has ever been written to
/// and still holds work shows up.
pub struct StoreProjects {
    store: Arc<dyn QueueStore>,
}

impl StoreProjects {
    /// Creates a store-backed registry.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectRegistry for StoreProjects {
    async fn projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.store.queues().await.into_iter().collect();
        projects.sort();
        projects
    }
}

/// Configuration for the poller loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum queued-up consumer requests before `next` callers block.
    pub request_capacity: usize,
    /// Delay between poll passes in [`QueuePoller::run`].
    pub poll_interval: Duration,
    /// How often [`QueuePoller::run`] re-derives the project set.
    pub refresh_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            request_capacity: 16,
            poll_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(30),
        }
    }
}

impl PollerConfig {
    /// Sets the request channel capacity.
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Sets the delay between poll passes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the project refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

/// Consumer side of a poller: hands out the next scheduled job.
#[derive(Clone)]
pub struct PollerHandle {
    requests: mpsc::Sender<oneshot::Sender<ScheduleMessage>>,
}

impl PollerHandle {
    /// Registers one request and waits for a poll pass to satisfy it.
    ///
    /// Requests are satisfied strictly in registration order. Returns
    /// `None` once the poller has shut down.
    pub async fn next(&self) -> Option<ScheduleMessage> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).await.ok()?;
        rx.await.ok()
    }
}

/// Fan-in poller over every known project queue.
pub struct QueuePoller {
    store: Arc<dyn QueueStore>,
    registry: Arc<dyn ProjectRegistry>,
    config: PollerConfig,
    queues: HashMap<String, ProjectQueue>,
    requests_tx: mpsc::Sender<oneshot::Sender<ScheduleMessage>>,
    requests_rx: mpsc::Receiver<oneshot::Sender<ScheduleMessage>>,
    /// Requests received but not yet satisfied, oldest first.
    pending: VecDeque<oneshot::Sender<ScheduleMessage>>,
}

impl QueuePoller {
    /// Creates a poller and derives its initial project set.
    pub async fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<dyn ProjectRegistry>,
        config: PollerConfig,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(config.request_capacity.max(1));
        let mut poller = Self {
            store,
            registry,
            config,
            queues: HashMap::new(),
            requests_tx,
            requests_rx,
            pending: VecDeque::new(),
        };
        poller.update_projects().await;
        poller
    }

    /// Returns a cloneable consumer handle.
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            requests: self.requests_tx.clone(),
        }
    }

    /// Currently known project names.
    pub fn projects(&self) -> Vec<&str> {
        self.queues.keys().map(String::as_str).collect()
    }

    /// Re-derives the queue map from the project registry.
    pub async fn update_projects(&mut self) {
        let projects = self.registry.projects().await;
        debug!(count = projects.len(), "refreshed project set");
        self.queues = projects
            .into_iter()
            .map(|project| {
                let queue = ProjectQueue::new(Arc::clone(&self.store), project.clone());
                (project, queue)
            })
            .collect();
    }

    /// One poll pass: advances at most one job.
    ///
    /// Does nothing unless a consumer is waiting. Otherwise scans every
    /// known queue once, pops one job from the first non-empty queue,
    /// normalizes it and satisfies the oldest live request. A pop that
    /// comes back empty (another node won the race) just moves on to the
    /// next queue.
    pub async fn poll(&mut self) {
        while let Ok(request) = self.requests_rx.try_recv() {
            self.pending.push_back(request);
        }
        while matches!(self.pending.front(), Some(request) if request.is_closed()) {
            self.pending.pop_front();
        }
        if self.pending.is_empty() {
            return;
        }

        let unified = self.store.key_space().unified();
        for (project, queue) in &self.queues {
            if queue.count().await == 0 {
                continue;
            }
            let Some(record) = queue.pop().await else {
                continue;
            };

            let mut message = ScheduleMessage::from_record(record, project, unified);
            while let Some(request) = self.pending.pop_front() {
                match request.send(message) {
                    Ok(()) => return,
                    Err(returned) => {
                        debug!("consumer gave up before delivery");
                        message = returned;
                    }
                }
            }
            warn!(job_id = %message.id, "no live consumer left for popped job, dropping it");
            return;
        }
    }

    /// Poll loop: runs until the shutdown signal fires.
    ///
    /// Refreshes the project set every `refresh_interval` so queues
    /// appearing after startup get drained too.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(projects = self.queues.len(), "queue poller started");
        let mut last_refresh = Instant::now();

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!("queue poller received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            if last_refresh.elapsed() >= self.config.refresh_interval {
                self.update_projects().await;
                last_refresh = Instant::now();
            }

            self.poll().await;
            tokio::time::sleep(self.config.poll_interval).await;
        }

        info!("queue poller stopped");
    }
}
