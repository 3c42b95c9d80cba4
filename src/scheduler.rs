//! Ticket-based deferred callbacks.
//!
//! [`TicketScheduler`] runs a callback after an approximate delay and hands
//! back a [`Ticket`] that can cancel it. A background task polls the job
//! registry on a fixed interval, so the interval is the firing resolution.
//!
//! # Job lifecycle
//!
//! A job is either `Scheduled -> Fired` or `Scheduled -> Cancelled`. The
//! polling task and [`TicketScheduler::cancel`] both *remove* the job from the
//! registry and only the side whose removal succeeds acts on it, so a
//! callback runs at most once and a late cancel is a silent no-op.
//!
//! Callback errors and panics are logged and swallowed; one failing job never
//! stops the others or the polling loop.

use dashmap::DashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::error::{BoxError, PipelineError};
use crate::logging::millis;

/// Handle of a scheduled job. Unique for the lifetime of its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Callback = Box<dyn FnOnce() -> Result<(), BoxError> + Send + Sync + 'static>;

/// Deadline used when `now + delay` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Job {
    expires_at: Instant,
    callback: Callback,
}

/// Configuration for [`TicketScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the registry is scanned for due jobs (default: 50ms)
    pub check_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(50),
        }
    }
}

impl SchedulerConfig {
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.check_interval.is_zero() {
            return Err("check_interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Schedules callbacks to fire after a delay.
///
/// State is per instance: every scheduler owns its registry, its ticket
/// counter and its polling task.
pub struct TicketScheduler {
    jobs: Arc<DashMap<Ticket, Job>>,
    next_ticket: AtomicU64,
    disposed: AtomicBool,
    config: SchedulerConfig,
    shutdown_tx: Arc<RwLock<Option<oneshot::Sender<()>>>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl TicketScheduler {
    /// Validates `config` and starts the polling task on the current tokio
    /// runtime.
    pub fn start(config: SchedulerConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Configuration)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            PipelineError::Configuration(format!("ticket scheduler needs a tokio runtime: {err}"))
        })?;

        let jobs = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = runtime.spawn(poll_task(
            jobs.clone(),
            config.check_interval,
            shutdown_rx,
        ));

        info!(
            check_interval_ms = millis(config.check_interval),
            "ticket scheduler started"
        );

        Ok(Self {
            jobs,
            next_ticket: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            config,
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            task_handle: Arc::new(RwLock::new(Some(handle))),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registers `callback` to run once `delay` has elapsed.
    ///
    /// Returns immediately. After [`shutdown`](Self::shutdown) the job is
    /// dropped without being registered.
    pub fn acquire<F>(&self, delay: Duration, callback: F) -> Ticket
    where
        F: FnOnce() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1);
        if self.disposed.load(Ordering::Acquire) {
            debug!(%ticket, "scheduler disposed, dropping job");
            return ticket;
        }

        self.jobs.insert(
            ticket,
            Job {
                expires_at: deadline(Instant::now(), delay),
                callback: Box::new(callback),
            },
        );

        #[cfg(feature = "metrics")]
        counter!("message_pipeline.scheduler.acquired").increment(1);

        debug!(%ticket, delay_ms = millis(delay), "job scheduled");
        ticket
    }

    /// Cancels the job behind `ticket`.
    ///
    /// Returns `true` when the job was still scheduled. Fired, cancelled and
    /// unknown tickets are a no-op returning `false`.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        let removed = self.jobs.remove(&ticket).is_some();
        if removed {
            #[cfg(feature = "metrics")]
            counter!("message_pipeline.scheduler.cancelled").increment(1);

            debug!(%ticket, "job cancelled");
        }
        removed
    }

    /// Number of jobs still scheduled.
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stops the polling task. Jobs still scheduled are dropped, never run.
    pub async fn shutdown(&self) {
        self.disposed.store(true, Ordering::Release);

        {
            let mut tx_guard = self.shutdown_tx.write().await;
            if let Some(tx) = tx_guard.take() {
                let _ = tx.send(());
            }
        }

        let handle = self.task_handle.write().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let dropped = self.jobs.len();
        self.jobs.clear();
        info!(dropped, "ticket scheduler shut down");
    }
}

impl fmt::Debug for TicketScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketScheduler")
            .field("pending", &self.jobs.len())
            .field("disposed", &self.is_disposed())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for TicketScheduler {
    fn drop(&mut self) {
        // Best effort: the polling task stops on the signal and drops its
        // handle on the registry.
        if let Ok(mut tx_guard) = self.shutdown_tx.try_write() {
            if let Some(tx) = tx_guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}

#[instrument(skip_all, name = "ticket_scheduler")]
async fn poll_task(
    jobs: Arc<DashMap<Ticket, Job>>,
    check_interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fired = fire_due(&jobs, Instant::now());
                if fired > 0 {
                    debug!(fired, pending = jobs.len(), "scheduler tick");
                }

                #[cfg(feature = "metrics")]
                gauge!("message_pipeline.scheduler.pending").set(jobs.len() as f64);
            }
            _ = &mut shutdown_rx => {
                debug!("received shutdown signal, stopping scheduler loop");
                break;
            }
        }
    }
}

/// Removes and runs every job due at `now`. Returns how many ran.
fn fire_due(jobs: &DashMap<Ticket, Job>, now: Instant) -> usize {
    // Collect first: removing while iterating would deadlock on the shard.
    let due: Vec<Ticket> = jobs
        .iter()
        .filter(|entry| entry.value().expires_at <= now)
        .map(|entry| *entry.key())
        .collect();

    let mut fired = 0;
    for ticket in due {
        // A concurrent cancel may already own the job.
        let Some((_, job)) = jobs.remove(&ticket) else {
            continue;
        };
        fired += 1;
        run_job(ticket, job);
    }
    fired
}

fn run_job(ticket: Ticket, job: Job) {
    match catch_unwind(AssertUnwindSafe(job.callback)) {
        Ok(Ok(())) => {
            #[cfg(feature = "metrics")]
            counter!("message_pipeline.scheduler.fired").increment(1);

            debug!(%ticket, "job fired");
        }
        Ok(Err(err)) => {
            #[cfg(feature = "metrics")]
            counter!("message_pipeline.scheduler.callback_error").increment(1);

            warn!(%ticket, error = %err, "scheduled callback failed");
        }
        Err(_) => {
            #[cfg(feature = "metrics")]
            counter!("message_pipeline.scheduler.callback_panic").increment(1);

            error!(%ticket, "scheduled callback panicked");
        }
    }
}
