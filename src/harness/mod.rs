//! The remote stream-tester harness: starts runs, reports their stats, and
//! stops everything on request.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::Result;
use crate::stats::{ResultRecord, RunId};

pub use self::client::HarnessClient;

/// Body of a `POST /start_streams` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(default)]
    pub base_manifest_id: String,
}

/// Operations the engine needs from the harness.
///
/// Implementations must tolerate concurrent calls from the schedule loop and
/// every in-flight poll task.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Start a batch of streams. Returns the run identifier.
    async fn start_run(&self, config: &RunConfig) -> Result<RunId>;

    /// Fetch the current stats of one run.
    async fn fetch_status(&self, id: &RunId) -> Result<ResultRecord>;

    /// Stop every run on the harness.
    async fn stop_all(&self) -> Result<()>;
}
