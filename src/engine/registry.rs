//! Tracks in-flight poll tasks so they can be listed, awaited, or cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::poll::PollOutcome;
use crate::stats::RunId;

struct PollHandle {
    run_id: RunId,
    cancel: CancellationToken,
    /// Taken by whoever joins the task; the entry stays until the task exits.
    task: Option<JoinHandle<PollOutcome>>,
}

/// A task removes its own entry when it exits, whatever the outcome.
#[derive(Default)]
pub struct PollRegistry {
    next_key: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, PollHandle>>>,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the future built by `make` and track it under `run_id`.
    pub fn spawn<F, Fut>(&self, run_id: RunId, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = PollOutcome> + Send + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let fut = make(cancel.clone());
        let tasks = Arc::clone(&self.tasks);

        // Held across spawn so the exit-time removal cannot run before insert.
        let mut guard = self.tasks.lock();
        let task = tokio::spawn(async move {
            let outcome = fut.await;
            tasks.lock().remove(&key);
            outcome
        });
        guard.insert(
            key,
            PollHandle {
                run_id,
                cancel,
                task: Some(task),
            },
        );
    }

    /// Run identifiers with a live poll task.
    pub fn in_flight(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self
            .tasks
            .lock()
            .values()
            .map(|h| h.run_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every task tracked right now to finish on its own. The tasks
    /// stay listed in [`PollRegistry::in_flight`] until they exit.
    pub async fn join_all(&self) -> Vec<(RunId, PollOutcome)> {
        let handles: Vec<(RunId, JoinHandle<PollOutcome>)> = self
            .tasks
            .lock()
            .values_mut()
            .filter_map(|h| h.task.take().map(|task| (h.run_id.clone(), task)))
            .collect();
        collect(handles).await
    }

    /// Cancel every tracked task and wait for them to wind down.
    pub async fn cancel_all(&self) -> Vec<(RunId, PollOutcome)> {
        let handles: Vec<(RunId, JoinHandle<PollOutcome>)> = self
            .tasks
            .lock()
            .drain()
            .filter_map(|(_, h)| {
                h.cancel.cancel();
                h.task.map(|task| (h.run_id, task))
            })
            .collect();
        collect(handles).await
    }
}

async fn collect(handles: Vec<(RunId, JoinHandle<PollOutcome>)>) -> Vec<(RunId, PollOutcome)> {
    let (ids, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let results = futures::future::join_all(tasks).await;

    ids.into_iter()
        .zip(results)
        .filter_map(|(id, res)| match res {
            Ok(outcome) => Some((id, outcome)),
            Err(e) => {
                tracing::error!(run_id = %id, error = %e, "poll task panicked");
                None
            }
        })
        .collect()
}
