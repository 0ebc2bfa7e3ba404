//! Run orchestration: periodic and on-demand dispatch, plus one completion
//! poll per dispatched run.
//!
//! ```text
//! schedule tick / dispatch_run
//!     -> ConfigCell snapshot -> Harness::start_run -> RunId
//!     -> PollTask(RunId): sleep, fetch, persist, ... until finished
//! ```

pub mod poll;
pub mod registry;

#[cfg(test)]
mod fakes;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{ConfigCell, RunConfig};
use crate::error::{Error, Result};
use crate::harness::Harness;
use crate::stats::{ResultRecord, RunId};
use crate::storage::ResultStore;

pub use self::poll::{PollOutcome, PollTask};
pub use self::registry::PollRegistry;

/// Delay before each status poll of a run.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    pub poll_interval: Duration,
    /// `None` polls until the harness reports the run finished.
    pub max_poll_attempts: Option<u32>,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
        }
    }
}

/// `Idle -> Scheduling -> Stopped`; a stopped engine never schedules again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Idle,
    Scheduling,
    Stopped,
}

impl ScheduleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleState::Idle => "idle",
            ScheduleState::Scheduling => "scheduling",
            ScheduleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct EngineInner {
    config: ConfigCell,
    harness: Arc<dyn Harness>,
    store: Arc<dyn ResultStore>,
    policy: EnginePolicy,
    polls: PollRegistry,
    state: Mutex<ScheduleState>,
    schedule_cancel: CancellationToken,
}

/// Cheap to clone; clones share the same config, schedule, and poll tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// `shutdown` is the process-level token; cancelling it also ends the
    /// schedule loop (but not in-flight polls).
    pub fn new(
        harness: Arc<dyn Harness>,
        store: Arc<dyn ResultStore>,
        config: RunConfig,
        policy: EnginePolicy,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: ConfigCell::new(config),
                harness,
                store,
                policy,
                polls: PollRegistry::new(),
                state: Mutex::new(ScheduleState::Idle),
                schedule_cancel: shutdown.child_token(),
            }),
        }
    }

    pub fn config(&self) -> Arc<RunConfig> {
        self.inner.config.get()
    }

    /// Replace the config used by subsequent scheduled dispatches.
    pub fn set_config(&self, config: RunConfig) -> Result<()> {
        config.validate()?;
        info!(
            host = %config.host,
            simultaneous = config.simultaneous,
            repeat = config.repeat,
            "Run configuration updated"
        );
        self.inner.config.set(config);
        Ok(())
    }

    pub fn state(&self) -> ScheduleState {
        *self.inner.state.lock()
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.inner.store
    }

    /// Start a run with a caller-supplied config. Latency is always measured
    /// and harness stats always reset, so every such run is comparable.
    pub async fn dispatch_run(&self, mut config: RunConfig) -> Result<RunId> {
        config.validate()?;
        config.do_not_clear_stats = false;
        self.dispatch(&config).await
    }

    async fn dispatch(&self, config: &RunConfig) -> Result<RunId> {
        let mut request = config.clone();
        request.measure_latency = true;

        let id = self.inner.harness.start_run(&request).await?;
        self.spawn_poll(id.clone());
        Ok(id)
    }

    fn spawn_poll(&self, id: RunId) {
        let task = PollTask::new(
            id.clone(),
            Arc::clone(&self.inner.harness),
            Arc::clone(&self.inner.store),
            self.inner.policy,
        );
        self.inner.polls.spawn(id, |cancel| task.run(cancel));
    }

    /// Dispatch the current config now and then every `interval` until
    /// [`Engine::stop_schedule`]. A failed dispatch is logged and the
    /// schedule carries on.
    pub fn run_schedule(&self, interval: Duration) -> Result<JoinHandle<()>> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "schedule interval must be greater than zero".to_string(),
            ));
        }
        {
            let mut state = self.inner.state.lock();
            if *state != ScheduleState::Idle {
                return Err(Error::InvalidState {
                    current: state.as_str(),
                    action: "start the schedule",
                });
            }
            *state = ScheduleState::Scheduling;
        }

        let engine = self.clone();
        let cancel = self.inner.schedule_cancel.clone();
        Ok(tokio::spawn(async move {
            engine.schedule_loop(interval, cancel).await;
        }))
    }

    async fn schedule_loop(&self, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Schedule started");

        // The first tick completes immediately.
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = self.config();
                    match self.dispatch(&snapshot).await {
                        Ok(id) => info!(run_id = %id, "Started streams"),
                        Err(e) => error!(error = %e, "Scheduled dispatch failed"),
                    }
                }
            }
        }

        info!("Schedule stopped");
    }

    /// Halt the schedule for good and ask the harness to stop all runs.
    /// In-flight poll tasks keep running.
    pub async fn stop_schedule(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state == ScheduleState::Stopped {
                return Err(Error::InvalidState {
                    current: state.as_str(),
                    action: "stop the schedule",
                });
            }
            *state = ScheduleState::Stopped;
        }
        self.inner.schedule_cancel.cancel();

        self.inner.harness.stop_all().await?;
        info!("Harness stopped all streams");
        Ok(())
    }

    pub fn in_flight(&self) -> Vec<RunId> {
        self.inner.polls.in_flight()
    }

    /// Wait for the poll tasks in flight right now to finish on their own.
    pub async fn wait_polls(&self) -> Vec<(RunId, PollOutcome)> {
        self.inner.polls.join_all().await
    }

    /// Cancel and join every in-flight poll task. Nothing else cancels them.
    pub async fn shutdown_polls(&self) -> Vec<(RunId, PollOutcome)> {
        let outcomes = self.inner.polls.cancel_all().await;
        if !outcomes.is_empty() {
            info!(count = outcomes.len(), "Cancelled in-flight stats polls");
        }
        outcomes
    }

    pub async fn stats(&self, id: &RunId) -> Result<ResultRecord> {
        self.inner.store.select(id).await
    }

    pub async fn all_stats(&self) -> Result<Vec<(RunId, ResultRecord)>> {
        self.inner.store.all().await
    }
}
