//! Recurring pipeline runs.
//!
//! Two independent loops drive the pipeline:
//!
//! - the **daily** loop waits for a fixed local wall-clock time, runs once in
//!   [`Mode::Daily`], then recomputes the next occurrence;
//! - the **interval** loop ticks on a fixed period and runs in [`Mode::Recent`].
//!
//! Both watch one stop signal. Stopping prevents new runs from starting; a run
//! already in progress finishes first. A failed run is logged and the loop
//! waits for its next occurrence.

use async_trait::async_trait;
use chrono::{DateTime, Days, Local, LocalResult, NaiveTime, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{error, info, instrument, warn};

use crate::config::{ConfigError, ScheduleConfig};
use crate::models::Mode;
use crate::pipeline::{PipelineError, RunSummary};

/// Anything that can perform one pipeline invocation.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, mode: Mode) -> Result<RunSummary, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Waiting,
    Running,
    Stopped,
}

/// The first instant strictly after `now` whose wall-clock time is `at`.
///
/// A time skipped by a DST gap moves to the next day that has it; a repeated
/// time resolves to its earlier occurrence.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();

    for offset in 0..=7 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let candidate = match tz.from_local_datetime(&date.and_time(at)) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
            LocalResult::None => continue,
        };
        if candidate > *now {
            return candidate;
        }
    }

    now.clone() + chrono::Duration::days(1)
}

pub struct Scheduler {
    runner: Arc<dyn PipelineRunner>,
    daily_at: NaiveTime,
    interval: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn PipelineRunner>, config: &ScheduleConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_times(runner, config.daily_time()?, config.interval()))
    }

    pub fn with_times(runner: Arc<dyn PipelineRunner>, daily_at: NaiveTime, interval: Duration) -> Self {
        Self {
            runner,
            daily_at,
            interval,
        }
    }

    /// Spawn both loops and return the handle that stops them.
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (daily_state_tx, daily_state) = watch::channel(LoopState::Waiting);
        let (interval_state_tx, interval_state) = watch::channel(LoopState::Waiting);

        info!(daily_at = %self.daily_at, interval = ?self.interval, "Starting scheduler");

        let daily = tokio::spawn(daily_loop(
            Arc::clone(&self.runner),
            self.daily_at,
            stop_rx.clone(),
            daily_state_tx,
        ));
        let interval = tokio::spawn(interval_loop(
            Arc::clone(&self.runner),
            self.interval,
            stop_rx,
            interval_state_tx,
        ));

        SchedulerHandle {
            stop_tx,
            daily,
            interval,
            daily_state,
            interval_state,
        }
    }
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    daily: JoinHandle<()>,
    interval: JoinHandle<()>,
    daily_state: watch::Receiver<LoopState>,
    interval_state: watch::Receiver<LoopState>,
}

impl SchedulerHandle {
    pub fn daily_state(&self) -> watch::Receiver<LoopState> {
        self.daily_state.clone()
    }

    pub fn interval_state(&self) -> watch::Receiver<LoopState> {
        self.interval_state.clone()
    }

    /// Signal both loops to stop and wait for them, including any run in progress.
    pub async fn stop(self) {
        info!("Stopping scheduler");
        self.stop_tx.send_replace(true);
        for (name, handle) in [("daily", self.daily), ("interval", self.interval)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Scheduler loop ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

/// Resolves once stop is requested or the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#[instrument(level = "info", skip_all, fields(task = "daily"))]
async fn daily_loop(
    runner: Arc<dyn PipelineRunner>,
    at: NaiveTime,
    mut stop: watch::Receiver<bool>,
    state: watch::Sender<LoopState>,
) {
    loop {
        let now = Local::now();
        let next = next_daily_run(&now, at);
        let wait = (next.clone() - now).to_std().unwrap_or_default();
        info!(next = %next, "Next daily run scheduled");

        state.send_replace(LoopState::Waiting);
        tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => break,
            _ = sleep(wait) => {}
        }
        run_once(runner.as_ref(), Mode::Daily, &state).await;
    }
    state.send_replace(LoopState::Stopped);
}

#[instrument(level = "info", skip_all, fields(task = "interval", period = ?period))]
async fn interval_loop(
    runner: Arc<dyn PipelineRunner>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    state: watch::Sender<LoopState>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        state.send_replace(LoopState::Waiting);
        tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => break,
            _ = ticker.tick() => {}
        }
        run_once(runner.as_ref(), Mode::Recent, &state).await;
    }
    state.send_replace(LoopState::Stopped);
}

async fn run_once(runner: &dyn PipelineRunner, mode: Mode, state: &watch::Sender<LoopState>) {
    state.send_replace(LoopState::Running);
    info!(%mode, "Scheduled run starting");
    match runner.run(mode).await {
        Ok(summary) => info!(
            %mode,
            accepted = summary.accepted.len(),
            articles = summary.articles,
            delivered = summary.delivered,
            "Scheduled run finished"
        ),
        Err(e) => warn!(%mode, error = %e, "Scheduled run failed; waiting for the next occurrence"),
    }
}
