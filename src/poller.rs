//! Periodic detect → dispatch loop.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use chrono::{DateTime, Local};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    detector::{detect, Detection},
    dispatch::{DispatchReport, Dispatcher},
    error::DispatchError,
    sources::FeedSource,
    watermark::Watermark,
};

/// State carried from one cycle to the next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollState {
    pub watermark: Watermark,
    /// Until a cycle completes, only the newest post gets dispatched.
    pub first_run: bool,
}

impl PollState {
    pub fn new(watermark: Watermark) -> Self {
        Self {
            watermark,
            first_run: true,
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Transport or decode failure; retried on the next tick.
    FeedUnavailable,
    NoPosts,
    UpToDate,
    Dispatched(Vec<DispatchReport>),
}

/// Read-only snapshot for the command surface.
#[derive(Clone, Debug)]
pub struct PollStatus {
    pub last_check: Option<DateTime<Local>>,
    pub watermark: Watermark,
    pub interval: Duration,
    pub posts_dispatched: u64,
}

pub type SharedStatus = Arc<RwLock<PollStatus>>;

pub struct PollCycle {
    feed: Arc<dyn FeedSource>,
    dispatcher: Arc<Dispatcher>,
}

impl PollCycle {
    pub fn new(feed: Arc<dyn FeedSource>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { feed, dispatcher }
    }

    /// One full cycle. Posts are dispatched one after the other; the first
    /// persistence failure aborts the cycle.
    pub async fn run(&self, state: &mut PollState) -> Result<CycleOutcome, DispatchError> {
        let posts = match self.feed.get_recent_posts().await {
            Ok(posts) => posts,
            Err(e) => {
                tracing::warn!(error = %e, "cannot fetch feed");
                return Ok(CycleOutcome::FeedUnavailable);
            }
        };

        let new_posts = match detect(&posts, state.watermark, state.first_run) {
            Detection::NoPosts => {
                tracing::warn!("no posts found");
                return Ok(CycleOutcome::NoPosts);
            }
            Detection::UpToDate => {
                tracing::debug!(watermark = %state.watermark, "no new posts");
                state.first_run = false;
                return Ok(CycleOutcome::UpToDate);
            }
            Detection::New(new_posts) => new_posts,
        };

        if state.first_run {
            tracing::info!(post_id = new_posts[0].id, "first run, uploading latest post");
        } else {
            tracing::info!(count = new_posts.len(), "found new posts");
        }

        let mut reports = Vec::with_capacity(new_posts.len());
        for post in &new_posts {
            reports.push(self.dispatcher.dispatch(post, &mut state.watermark).await?);
        }

        state.first_run = false;
        Ok(CycleOutcome::Dispatched(reports))
    }
}

struct Inner {
    cycle: PollCycle,
    state: tokio::sync::Mutex<PollState>,
    status: SharedStatus,
    interval: Duration,
    running: watch::Sender<bool>,
    fatal: Mutex<Option<DispatchError>>,
}

impl Inner {
    async fn tick(&self) -> Result<CycleOutcome, DispatchError> {
        let mut state = self.state.lock().await;
        let result = self.cycle.run(&mut state).await;

        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        status.last_check = Some(Local::now());
        status.watermark = state.watermark;
        if let Ok(CycleOutcome::Dispatched(reports)) = &result {
            status.posts_dispatched += reports.len() as u64;
        }

        result
    }

    async fn run_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // A stop requested during the last cycle wins over a due tick.
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = timer.tick() => {}
            }
            if *stop.borrow() {
                break;
            }

            // Outside the select: a cycle, once started, always completes.
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "stopping poller");
                *self.fatal.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
                break;
            }
        }

        self.running.send_replace(false);
    }
}

struct Task {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

/// Cancellable periodic task. Cycles never overlap: a tick that fires while
/// a cycle runs is skipped.
pub struct Poller {
    inner: Arc<Inner>,
    task: Mutex<Option<Task>>,
}

impl Poller {
    pub fn new(cycle: PollCycle, state: PollState, interval: Duration) -> Self {
        let status = PollStatus {
            last_check: None,
            watermark: state.watermark,
            interval,
            posts_dispatched: 0,
        };
        let (running, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                cycle,
                state: tokio::sync::Mutex::new(state),
                status: Arc::new(RwLock::new(status)),
                interval,
                running,
                fatal: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.inner.status)
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Starts the loop; returns `false` if it was already running. A stopped
    /// poller can be started again and continues from the same state.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_running() {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.inner.running.send_replace(true);
        let handle = tokio::spawn(Arc::clone(&self.inner).run_loop(stop_rx));

        *task = Some(Task {
            handle,
            stop: stop_tx,
        });
        tracing::info!(interval = ?self.inner.interval, "poller started");
        true
    }

    /// Asks the loop to stop and waits for the cycle in progress to finish.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(task) = task else {
            return;
        };

        task.stop.send_replace(true);
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "poller task panicked");
            self.inner.running.send_replace(false);
        }
        tracing::info!("poller stopped");
    }

    /// Runs a single cycle outside of the timer.
    pub async fn run_once(&self) -> Result<CycleOutcome, DispatchError> {
        self.inner.tick().await
    }

    /// Resolves once the loop has exited, with the error that ended it, if any.
    pub async fn stopped(&self) -> Option<DispatchError> {
        let mut running = self.inner.running.subscribe();
        while *running.borrow_and_update() {
            if running.changed().await.is_err() {
                break;
            }
        }
        self.inner.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
