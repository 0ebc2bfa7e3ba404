//! Per-run completion polling.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::EnginePolicy;
use crate::harness::Harness;
use crate::stats::RunId;
use crate::storage::ResultStore;

/// How a poll task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The harness reported the run finished; the final record was written.
    Finished { polls: u32 },
    /// A status fetch failed. The stored record stays at its last value.
    Abandoned { polls: u32 },
    /// `max_poll_attempts` reached without the run finishing.
    GaveUp { polls: u32 },
    Cancelled { polls: u32 },
}

/// Polls one run until the harness reports it finished, writing every
/// fetched record to the store.
pub struct PollTask {
    run_id: RunId,
    harness: Arc<dyn Harness>,
    store: Arc<dyn ResultStore>,
    policy: EnginePolicy,
}

impl PollTask {
    pub fn new(
        run_id: RunId,
        harness: Arc<dyn Harness>,
        store: Arc<dyn ResultStore>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            run_id,
            harness,
            store,
            policy,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> PollOutcome {
        let id = &self.run_id;
        let mut polls = 0u32;

        loop {
            // The harness needs a moment before a new run's manifests exist.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { polls },
                _ = tokio::time::sleep(self.policy.poll_interval) => {}
            }

            polls += 1;
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { polls },
                res = self.harness.fetch_status(id) => res,
            };

            let record = match fetched {
                Ok(record) => record.with_derived_fields(),
                Err(e) => {
                    error!(run_id = %id, attempt = polls, error = %e, "Stats poll failed, giving up on run");
                    return PollOutcome::Abandoned { polls };
                }
            };

            let finished = record.finished;
            if let Err(e) = self.store.insert(id, &record).await {
                error!(run_id = %id, attempt = polls, error = %e, "unable to insert stats into DB");
            } else {
                debug!(
                    run_id = %id,
                    attempt = polls,
                    sent = record.sent_segments,
                    downloaded = record.downloaded_segments,
                    "Stats flushed"
                );
            }

            if finished {
                info!(run_id = %id, polls, success_rate = record.success_rate, "Run finished");
                return PollOutcome::Finished { polls };
            }

            if let Some(max) = self.policy.max_poll_attempts {
                if polls >= max {
                    warn!(run_id = %id, polls, "Run still unfinished after max poll attempts, giving up");
                    return PollOutcome::GaveUp { polls };
                }
            }
        }
    }
}
