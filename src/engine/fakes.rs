//! Scripted harness and recording store for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::harness::Harness;
use crate::stats::{ResultRecord, RunId};
use crate::storage::ResultStore;

/// One scripted answer to a status fetch.
#[derive(Debug, Clone)]
pub enum Step {
    Running,
    Done(ResultRecord),
    Fail,
}

pub struct FakeHarness {
    accept: bool,
    stop_ok: bool,
    ids: Mutex<VecDeque<String>>,
    started: Mutex<Vec<RunConfig>>,
    scripts: Mutex<HashMap<RunId, VecDeque<Step>>>,
    start_attempts: AtomicUsize,
    fetches: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeHarness {
    /// Accepts every run, naming them `run-1`, `run-2`, ...
    pub fn new() -> Self {
        Self {
            accept: true,
            stop_ok: true,
            ids: Mutex::new(VecDeque::new()),
            started: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            start_attempts: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Answers every start with `success: false`.
    pub fn rejecting() -> Self {
        Self {
            accept: false,
            ..Self::new()
        }
    }

    pub fn with_ids<const N: usize>(ids: [&str; N]) -> Self {
        let harness = Self::new();
        harness
            .ids
            .lock()
            .extend(ids.iter().map(|s| s.to_string()));
        harness
    }

    pub fn failing_stop(self) -> Self {
        Self {
            stop_ok: false,
            ..self
        }
    }

    /// Status answers for `id`, in order. Once exhausted, fetches fail.
    pub fn script(&self, id: &str, steps: Vec<Step>) {
        self.scripts.lock().insert(RunId::new(id), steps.into());
    }

    pub fn started_configs(&self) -> Vec<RunConfig> {
        self.started.lock().clone()
    }

    pub fn start_attempts(&self) -> usize {
        self.start_attempts.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Harness for FakeHarness {
    async fn start_run(&self, config: &RunConfig) -> Result<RunId> {
        let attempt = self.start_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.accept {
            return Err(Error::RemoteRejected(
                "server failed to start streams".to_string(),
            ));
        }
        self.started.lock().push(config.clone());
        let id = self
            .ids
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("run-{attempt}"));
        Ok(RunId::new(id))
    }

    async fn fetch_status(&self, id: &RunId) -> Result<ResultRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self
            .scripts
            .lock()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Fail);
        match step {
            Step::Running => Ok(ResultRecord {
                sent_segments: 1,
                ..Default::default()
            }),
            Step::Done(record) => Ok(record),
            Step::Fail => Err(Error::RemoteRejected(
                "unable to make http request: 503 Service Unavailable".to_string(),
            )),
        }
    }

    async fn stop_all(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.stop_ok {
            Ok(())
        } else {
            Err(Error::StopFailed("503 Service Unavailable".to_string()))
        }
    }
}

/// In-memory store that records every insert attempt.
#[derive(Default)]
pub struct RecordingStore {
    writes: Mutex<Vec<(RunId, ResultRecord)>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingStore {
    /// Fail the next `n` inserts.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful writes for `id`.
    pub fn writes_for(&self, id: &RunId) -> usize {
        self.writes.lock().iter().filter(|(w, _)| w == id).count()
    }

    pub fn latest(&self, id: &RunId) -> Option<ResultRecord> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(w, _)| w == id)
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl ResultStore for RecordingStore {
    async fn insert(&self, id: &RunId, record: &ResultRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::StorageFailure("database is locked".to_string()));
        }
        self.writes.lock().push((id.clone(), record.clone()));
        Ok(())
    }

    async fn select(&self, id: &RunId) -> Result<ResultRecord> {
        self.latest(id).ok_or_else(|| Error::NotFound(id.clone()))
    }

    async fn all(&self) -> Result<Vec<(RunId, ResultRecord)>> {
        let mut latest: HashMap<RunId, ResultRecord> = HashMap::new();
        for (id, record) in self.writes.lock().iter() {
            latest.insert(id.clone(), record.clone());
        }
        let mut all: Vec<_> = latest.into_iter().collect();
        all.sort_by(|a, b| b.1.start_time.cmp(&a.1.start_time));
        Ok(all)
    }
}
