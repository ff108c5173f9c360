//! Background work scheduler.
//!
//! Runs named units of work (the metadata pass, the upload pass) on a
//! periodic interval and on demand. Each name is unique work: at most one
//! run is in flight, and an on-demand request either keeps the existing
//! queued/running work or replaces the queued run.
//!
//! Work that requires the network waits until it is available, and a
//! running job is cancelled through its [`CancellationToken`] when the
//! network goes away. The interrupted run is queued again.
//!
//! Failed runs are retried with exponential backoff when the error is
//! transient.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::sync::UploadTrigger;

/// Unique work name of the metadata sync pass.
pub const METADATA_WORK: &str = "metadata-sync";

/// Unique work name of the recording upload pass.
pub const UPLOAD_WORK: &str = "recording-upload";

/// What a finished run asks the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// More work is queued; run again immediately.
    RunAgain,
    /// Back off and retry.
    Retry,
}

/// How `run_now` treats work that is already queued or running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Replace a queued run. A running one is left alone and followed by a fresh run.
    Replace,
    /// Do nothing if the work is queued or running.
    Keep,
}

/// Externally visible state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Idle,
    Queued,
    Running,
}

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<JobOutcome>> + Send>>;

/// A schedulable unit of work.
pub trait Job: Send + Sync + 'static {
    /// Start one run. The token trips on shutdown or network loss.
    fn run(&self, cancel: CancellationToken) -> JobFuture;
}

struct FnJob<F>(F);

impl<F, Fut> Job for FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JobOutcome>> + Send + 'static,
{
    fn run(&self, cancel: CancellationToken) -> JobFuture {
        Box::pin((self.0)(cancel))
    }
}

/// Wrap an async closure as a [`Job`].
pub fn job_fn<F, Fut>(f: F) -> impl Job
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JobOutcome>> + Send + 'static,
{
    FnJob(f)
}

/// Exponential backoff for failed runs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failures before the work goes idle until the next trigger.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(30 * 60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

enum RunState {
    Idle,
    Queued,
    Running { follow_up: bool },
}

struct WorkEntry {
    job: Arc<dyn Job>,
    state: RunState,
    /// Bumped when a queued run is replaced; stale drivers exit on mismatch.
    generation: u64,
    requires_network: bool,
    attempts: u32,
}

struct Inner {
    works: Mutex<HashMap<String, WorkEntry>>,
    network: watch::Sender<bool>,
    root: CancellationToken,
    retry: RetryPolicy,
}

impl Inner {
    fn works(&self) -> MutexGuard<'_, HashMap<String, WorkEntry>> {
        self.works.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scheduler handle. Clones share the same work table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Non-owning scheduler handle.
///
/// Components that the scheduler's own jobs hold use this, so the job table
/// and the component do not keep each other alive.
#[derive(Clone)]
pub struct WeakScheduler {
    inner: Weak<Inner>,
}

impl WeakScheduler {
    /// The scheduler, if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.inner.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Scheduler {
    /// Create a scheduler. The network starts out available.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        let (network, _rx) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                works: Mutex::new(HashMap::new()),
                network,
                root: CancellationToken::new(),
                retry,
            }),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register (or re-register) a named unit of work.
    pub fn register(&self, name: &str, requires_network: bool, job: impl Job) {
        let mut works = self.inner.works();
        works.insert(
            name.to_string(),
            WorkEntry {
                job: Arc::new(job),
                state: RunState::Idle,
                generation: 0,
                requires_network,
                attempts: 0,
            },
        );
        debug!(work = name, requires_network, "Registered work");
    }

    /// Request a run now. Returns whether a run was queued or armed.
    pub fn run_now(&self, name: &str, policy: ExistingWorkPolicy) -> bool {
        let generation = {
            let mut works = self.inner.works();
            let Some(entry) = works.get_mut(name) else {
                warn!(work = name, "run_now for unregistered work");
                return false;
            };

            match (&mut entry.state, policy) {
                (RunState::Idle, _) | (RunState::Queued, ExistingWorkPolicy::Replace) => {}
                (RunState::Queued | RunState::Running { .. }, ExistingWorkPolicy::Keep) => {
                    debug!(work = name, "Already scheduled, keeping");
                    return false;
                }
                (RunState::Running { follow_up }, ExistingWorkPolicy::Replace) => {
                    *follow_up = true;
                    debug!(work = name, "Running, follow-up armed");
                    return true;
                }
            }

            entry.state = RunState::Queued;
            entry.generation += 1;
            entry.attempts = 0;
            entry.generation
        };

        self.spawn_driver(name.to_string(), generation, Duration::ZERO);
        true
    }

    /// Trigger `name` every `every`, starting now. Stops on shutdown.
    pub fn enqueue_periodic(&self, name: &str, every: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let name = name.to_string();
        info!(work = %name, every_secs = every.as_secs(), "Periodic work enqueued");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_now(&name, ExistingWorkPolicy::Keep);
                    }
                    () = scheduler.inner.root.cancelled() => break,
                }
            }
        })
    }

    /// Report connectivity. Losing it cancels running network-bound work.
    pub fn set_network_available(&self, available: bool) {
        let previous = self.inner.network.send_replace(available);
        if previous != available {
            info!(available, "Network availability changed");
        }
    }

    /// Cancel all running work and stop periodic triggers.
    pub fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.inner.root.cancel();
    }

    /// Resolves once [`shutdown`](Self::shutdown) was called.
    pub async fn stopped(&self) {
        self.inner.root.cancelled().await;
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<WorkState> {
        self.inner.works().get(name).map(|entry| match entry.state {
            RunState::Idle => WorkState::Idle,
            RunState::Queued => WorkState::Queued,
            RunState::Running { .. } => WorkState::Running,
        })
    }

    fn spawn_driver(&self, name: String, generation: u64, delay: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(drive(inner, name, generation, delay));
    }
}

impl UploadTrigger for Scheduler {
    fn trigger_upload(&self) {
        self.run_now(UPLOAD_WORK, ExistingWorkPolicy::Keep);
    }
}

impl UploadTrigger for WeakScheduler {
    fn trigger_upload(&self) {
        match self.upgrade() {
            Some(scheduler) => scheduler.trigger_upload(),
            None => debug!("Scheduler dropped, upload trigger ignored"),
        }
    }
}

/// Wait until the network is up. Returns false on shutdown.
async fn wait_for_network(inner: &Inner) -> bool {
    let mut rx = inner.network.subscribe();
    tokio::select! {
        up = async { rx.wait_for(|up| *up).await.is_ok() } => up,
        () = inner.root.cancelled() => false,
    }
}

/// Sleep unless shut down first. Returns false on shutdown.
async fn sleep_or_shutdown(inner: &Inner, delay: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = inner.root.cancelled() => false,
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Error>().is_some_and(Error::is_transient)
}

/// Drive one queued generation of `name` until it goes idle or is replaced.
async fn drive(inner: Arc<Inner>, name: String, generation: u64, delay: Duration) {
    if !delay.is_zero() && !sleep_or_shutdown(&inner, delay).await {
        return;
    }

    loop {
        let requires_network = match inner.works().get(&name) {
            Some(entry) => entry.requires_network,
            None => return,
        };
        if requires_network && !wait_for_network(&inner).await {
            return;
        }

        let job = {
            let mut works = inner.works();
            let Some(entry) = works.get_mut(&name) else {
                return;
            };
            if entry.generation != generation || !matches!(entry.state, RunState::Queued) {
                return;
            }
            entry.state = RunState::Running { follow_up: false };
            Arc::clone(&entry.job)
        };

        debug!(work = %name, "Run started");
        let run_cancel = CancellationToken::new();
        let mut network_rx = inner.network.subscribe();
        let mut run = job.run(run_cancel.clone());
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                () = inner.root.cancelled(), if !run_cancel.is_cancelled() => {
                    run_cancel.cancel();
                }
                changed = network_rx.changed(), if requires_network && !run_cancel.is_cancelled() => {
                    let lost = changed.is_err() || !*network_rx.borrow_and_update();
                    if lost {
                        info!(work = %name, "Network lost, cancelling run");
                        run_cancel.cancel();
                    }
                }
            }
        };
        let interrupted = run_cancel.is_cancelled();

        let delay = {
            let mut works = inner.works();
            let Some(entry) = works.get_mut(&name) else {
                return;
            };
            let follow_up = matches!(entry.state, RunState::Running { follow_up: true });

            if inner.root.is_cancelled() {
                entry.state = RunState::Idle;
                return;
            }

            let next = if interrupted {
                debug!(work = %name, "Interrupted run requeued");
                Some(Duration::ZERO)
            } else {
                match result {
                    Ok(JobOutcome::Done) => {
                        entry.attempts = 0;
                        follow_up.then_some(Duration::ZERO)
                    }
                    Ok(JobOutcome::RunAgain) => {
                        entry.attempts = 0;
                        Some(Duration::ZERO)
                    }
                    Ok(JobOutcome::Retry) => next_retry(&inner.retry, entry, &name, follow_up),
                    Err(e) if is_transient(&e) => {
                        let message = format!("{e:#}");
                        warn!(work = %name, error = %message, "Run failed");
                        next_retry(&inner.retry, entry, &name, follow_up)
                    }
                    Err(e) => {
                        let message = format!("{e:#}");
                        error!(work = %name, error = %message, "Run failed, not retrying");
                        entry.attempts = 0;
                        follow_up.then_some(Duration::ZERO)
                    }
                }
            };

            entry.state = if next.is_some() {
                RunState::Queued
            } else {
                RunState::Idle
            };
            next
        };

        match delay {
            None => {
                debug!(work = %name, "Run finished, idle");
                return;
            }
            Some(delay) if delay.is_zero() => {}
            Some(delay) => {
                debug!(work = %name, delay_secs = delay.as_secs(), "Retry scheduled");
                if !sleep_or_shutdown(&inner, delay).await {
                    return;
                }
            }
        }
    }
}

fn next_retry(
    policy: &RetryPolicy,
    entry: &mut WorkEntry,
    name: &str,
    follow_up: bool,
) -> Option<Duration> {
    if follow_up {
        entry.attempts = 0;
        return Some(Duration::ZERO);
    }
    entry.attempts += 1;
    if entry.attempts >= policy.max_attempts {
        warn!(work = name, attempts = entry.attempts, "Giving up until next trigger");
        entry.attempts = 0;
        return None;
    }
    Some(policy.backoff(entry.attempts))
}
