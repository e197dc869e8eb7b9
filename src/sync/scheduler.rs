use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::SyncPass;

const ERROR_LOG_CAPACITY: usize = 32;
const TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Stop requested while a pass was in flight.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched,
    /// A pass is already running or draining; nothing was queued.
    Skipped,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Most recent pass failures, oldest first.
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<PassError>>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut entries = lock(&self.entries);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(PassError {
            at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn recent(&self) -> Vec<PassError> {
        lock(&self.entries).iter().cloned().collect()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(ERROR_LOG_CAPACITY)
    }
}

struct Slot {
    state: SchedulerState,
    pass_cancel: Option<CancellationToken>,
}

struct Inner {
    pass: Arc<dyn SyncPass>,
    interval_minutes: u32,
    slot: Mutex<Slot>,
    /// `true` while a pass is in flight.
    running: watch::Sender<bool>,
    errors: ErrorLog,
    shutdown: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Runs a [`SyncPass`] whenever the wall-clock minute is a multiple of the
/// interval, never more than one at a time.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(pass: Arc<dyn SyncPass>, interval_minutes: u32) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pass,
                interval_minutes: interval_minutes.max(1),
                slot: Mutex::new(Slot {
                    state: SchedulerState::Idle,
                    pass_cancel: None,
                }),
                running,
                errors: ErrorLog::default(),
                shutdown: CancellationToken::new(),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.inner.slot).state
    }

    pub fn recent_errors(&self) -> Vec<PassError> {
        self.inner.errors.recent()
    }

    /// Start the minute ticker. Calling it again replaces nothing; the first
    /// ticker keeps running.
    pub fn start(&self) {
        let mut ticker = lock(&self.inner.ticker);
        if ticker.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }

        let scheduler = self.clone();
        let shutdown = self.inner.shutdown.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.on_tick(Local::now());
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("sync ticker stopped");
                        break;
                    }
                }
            }
        }));
        tracing::info!(
            "sync scheduled every {} minutes",
            self.inner.interval_minutes
        );
    }

    /// Launch a pass if `now` falls on the schedule.
    pub fn on_tick(&self, now: impl Timelike) -> Option<LaunchOutcome> {
        if now.minute() % self.inner.interval_minutes != 0 {
            return None;
        }
        Some(self.try_launch())
    }

    /// Start a pass unless one is already in flight.
    pub fn try_launch(&self) -> LaunchOutcome {
        let cancel = {
            let mut slot = lock(&self.inner.slot);
            match slot.state {
                SchedulerState::Running | SchedulerState::Draining => {
                    tracing::info!("previous sync still running, skipping this launch");
                    return LaunchOutcome::Skipped;
                }
                SchedulerState::Stopped => return LaunchOutcome::Stopped,
                SchedulerState::Idle => {}
            }
            let cancel = CancellationToken::new();
            slot.state = SchedulerState::Running;
            slot.pass_cancel = Some(cancel.clone());
            self.inner.running.send_replace(true);
            cancel
        };

        tracing::info!("sync pass starting");
        let pass = self.inner.pass.clone();
        let worker = tokio::spawn(async move { pass.run_pass(cancel).await });

        let inner = self.inner.clone();
        tokio::spawn(async move {
            match worker.await {
                Ok(Ok(())) => tracing::info!("sync pass complete"),
                Ok(Err(e)) if e.is_cancelled() => tracing::info!("sync pass cancelled"),
                Ok(Err(e)) => {
                    tracing::error!("sync pass failed: {}", e);
                    inner.errors.push(e.to_string());
                }
                Err(e) => {
                    let message = join_failure(e);
                    tracing::error!("{}", message);
                    inner.errors.push(message);
                }
            }
            inner.finish_pass();
        });

        LaunchOutcome::Launched
    }

    /// Resolves once no pass is in flight.
    pub async fn wait_idle(&self) {
        let mut running = self.inner.running.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Stop the ticker, cancel any in-flight pass and wait for it to drain.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();

        {
            let mut slot = lock(&self.inner.slot);
            match slot.state {
                SchedulerState::Idle | SchedulerState::Stopped => {
                    slot.state = SchedulerState::Stopped;
                }
                SchedulerState::Running | SchedulerState::Draining => {
                    tracing::info!("waiting for the running sync pass to finish");
                    slot.state = SchedulerState::Draining;
                    if let Some(cancel) = &slot.pass_cancel {
                        cancel.cancel();
                    }
                }
            }
        }

        self.wait_idle().await;
        lock(&self.inner.slot).state = SchedulerState::Stopped;

        let ticker = lock(&self.inner.ticker).take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                tracing::warn!("sync ticker ended abnormally: {}", e);
            }
        }
        tracing::info!("sync scheduler stopped");
    }
}

impl Inner {
    fn finish_pass(&self) {
        let mut slot = lock(&self.slot);
        if slot.state == SchedulerState::Running {
            slot.state = SchedulerState::Idle;
        }
        slot.pass_cancel = None;
        self.running.send_replace(false);
    }
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("sync pass aborted: {}", e);
    }
    let panic = e.into_panic();
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("sync pass panicked: {}", detail)
}

/// State transitions never leave data half-written, so a poisoned lock is
/// still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
