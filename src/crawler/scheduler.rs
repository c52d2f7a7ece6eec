//! Interval scheduler and the "one run at a time" gate
//!
//! This module handles:
//! - Arming and disarming periodic runs
//! - Skipping ticks that would overlap an active run
//! - Manual triggers that share the same overlap rule
//! - The background timer task

use crate::control::ControlError;
use crate::crawler::orchestrator::{CrawlOrchestrator, RunRequest};
use crate::storage::Storage;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Snapshot of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerState {
    /// Whether interval ticks are armed
    pub running: bool,
    pub interval_seconds: u64,
    /// When the next tick is due; `None` while disarmed
    pub next_run_at: Option<DateTime<Utc>>,
    /// Whether a run is in flight right now
    pub run_active: bool,
}

/// Result of one timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A scheduled run was started with this id
    Started(i64),
    /// A run was still active, so the tick did nothing
    SkippedOverlap,
    /// Ticks are disarmed
    Disarmed,
}

/// Process-wide flag marking that a run is active
#[derive(Debug, Default)]
pub struct RunGate {
    active: AtomicBool,
}

/// Holds the gate closed until dropped
#[derive(Debug)]
pub struct RunGuard {
    gate: Arc<RunGate>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the gate if it is open
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                gate: Arc::clone(self),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.gate.active.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct TimerState {
    armed: bool,
    interval_seconds: u64,
    next_run_at: Option<DateTime<Utc>>,
}

/// Triggers crawl runs on an interval and on demand
///
/// The scheduler coordinates:
/// - Armed/disarmed state and the next due time
/// - The run gate shared by ticks and manual triggers
/// - The task of the run currently in flight
pub struct Scheduler<S: Storage + 'static> {
    orchestrator: Arc<CrawlOrchestrator<S>>,
    state: Mutex<TimerState>,
    gate: Arc<RunGate>,
    active_task: Mutex<Option<JoinHandle<()>>>,
    rearmed: Notify,
}

impl<S: Storage + 'static> Scheduler<S> {
    /// Creates a disarmed scheduler
    ///
    /// # Arguments
    ///
    /// * `orchestrator` - Runs the crawls
    /// * `interval_seconds` - Time between scheduled ticks
    pub fn new(orchestrator: Arc<CrawlOrchestrator<S>>, interval_seconds: u64) -> Self {
        Self {
            orchestrator,
            state: Mutex::new(TimerState {
                armed: false,
                interval_seconds: interval_seconds.max(1),
                next_run_at: None,
            }),
            gate: Arc::new(RunGate::new()),
            active_task: Mutex::new(None),
            rearmed: Notify::new(),
        }
    }

    // Timer state is plain data, so a poisoned lock is still usable
    fn timer(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn orchestrator(&self) -> &Arc<CrawlOrchestrator<S>> {
        &self.orchestrator
    }

    /// Arms ticks; the first one is due one interval from now
    pub fn start(&self) {
        {
            let mut state = self.timer();
            state.armed = true;
            state.next_run_at =
                Some(Utc::now() + chrono::Duration::seconds(state.interval_seconds as i64));
        }
        tracing::info!("Scheduler started");
        self.rearmed.notify_one();
    }

    /// Disarms ticks; a run in flight is left to finish
    pub fn stop(&self) {
        {
            let mut state = self.timer();
            state.armed = false;
            state.next_run_at = None;
        }
        tracing::info!("Scheduler stopped");
        self.rearmed.notify_one();
    }

    pub fn status(&self) -> SchedulerState {
        let state = self.timer();
        SchedulerState {
            running: state.armed,
            interval_seconds: state.interval_seconds,
            next_run_at: state.next_run_at,
            run_active: self.gate.is_active(),
        }
    }

    /// Fires one scheduled tick
    ///
    /// Advances the due time, then starts a scheduled run unless one is
    /// already active.
    pub fn tick(&self) -> Result<TickOutcome> {
        {
            let mut state = self.timer();
            if !state.armed {
                return Ok(TickOutcome::Disarmed);
            }
            state.next_run_at =
                Some(Utc::now() + chrono::Duration::seconds(state.interval_seconds as i64));
        }

        let Some(guard) = self.gate.try_acquire() else {
            tracing::warn!("Scheduled tick skipped: a run is still active");
            return Ok(TickOutcome::SkippedOverlap);
        };

        let run_id = self.launch(guard, RunRequest::scheduled())?;
        Ok(TickOutcome::Started(run_id))
    }

    /// Starts a manual run right away, bypassing the interval
    ///
    /// # Returns
    ///
    /// * `Ok(run_id)` - The run was opened and is crawling in the background
    /// * `Err(ControlError::RunActive)` - Another run is in flight
    pub fn trigger_manual_run(&self, request: RunRequest) -> Result<i64> {
        let guard = self.gate.try_acquire().ok_or(ControlError::RunActive)?;
        self.launch(guard, request)
    }

    fn launch(&self, guard: RunGuard, request: RunRequest) -> Result<i64> {
        let handle = self.orchestrator.start_run(request.run_type)?;
        let run_id = handle.run_id();
        let orchestrator = Arc::clone(&self.orchestrator);

        let task = tokio::spawn(async move {
            let _guard = guard;
            match orchestrator.execute(handle, request).await {
                Ok(report) => tracing::info!(
                    run_id,
                    status = %report.run.status,
                    items = report.run.items_count,
                    "Run finished"
                ),
                Err(e) => tracing::error!(run_id, "Run could not be finalized: {}", e),
            }
        });

        *self
            .active_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
        tracing::info!(run_id, run_type = %request.run_type, "Run launched");
        Ok(run_id)
    }

    /// Waits until the run in flight, if any, has finished
    pub async fn wait_for_active_run(&self) {
        let task = self
            .active_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Run task ended abnormally: {}", e);
            }
        }
    }

    fn time_until_next_run(&self) -> Option<Duration> {
        let state = self.timer();
        if !state.armed {
            return None;
        }
        let next = state.next_run_at?;
        Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Spawns the background timer that calls `tick` when a run is due
    pub fn spawn_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.timer_loop().await })
    }

    async fn timer_loop(&self) {
        loop {
            match self.time_until_next_run() {
                Some(wait) if wait.is_zero() => match self.tick() {
                    Ok(TickOutcome::Started(run_id)) => {
                        tracing::debug!(run_id, "Scheduled run started")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Scheduled run could not start: {}", e),
                },
                Some(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.rearmed.notified() => {}
                    }
                }
                None => self.rearmed.notified().await,
            }
        }
    }
}
