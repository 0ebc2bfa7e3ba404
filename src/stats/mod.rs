//! Run identifiers and the per-run statistics record reported by the harness.

pub mod latency;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::latency::LatencySummary;

/// Opaque run identifier (the harness's base manifest ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Snapshot of one run's statistics.
///
/// `finished == false` is the only non-terminal state. Once a record with
/// `finished == true` has been persisted for a run, it is never replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultRecord {
    pub rtmp_streams: u32,
    pub media_streams: u32,
    pub total_segments_to_send: u32,
    pub sent_segments: u32,
    pub downloaded_segments: u32,
    pub should_have_downloaded_segments: u32,
    pub failed_to_download_segments: u32,
    pub profiles_num: u32,
    pub retries: u32,
    /// downloaded / (profiles * sent)
    pub success_rate: f64,
    pub connection_lost: u32,
    pub finished: bool,
    #[serde(with = "latency::nanos_vec")]
    pub raw_source_latencies: Vec<Duration>,
    #[serde(with = "latency::nanos_vec")]
    pub raw_transcoded_latencies: Vec<Duration>,
    pub source_latencies: LatencySummary,
    pub transcoded_latencies: LatencySummary,
    pub gaps: u32,
    pub start_time: DateTime<Utc>,
}

impl ResultRecord {
    /// Ratio of downloaded segments to what every profile of every sent
    /// segment should have produced, clamped to `[0, 1]`. `None` while
    /// nothing has been sent or no profile count is known.
    pub fn success_ratio(&self) -> Option<f64> {
        let expected = u64::from(self.profiles_num) * u64::from(self.sent_segments);
        if expected == 0 {
            return None;
        }
        Some((f64::from(self.downloaded_segments) / expected as f64).min(1.0))
    }

    /// Fill in the derived fields before the record is persisted: the
    /// success ratio and any latency summary the harness left empty but
    /// supplied raw samples for. When the ratio is not computable the
    /// harness's own rate is kept, read as a percentage if above 1.
    pub fn with_derived_fields(mut self) -> Self {
        self.success_rate = match self.success_ratio() {
            Some(ratio) => ratio,
            None => normalize_rate(self.success_rate),
        };
        if self.source_latencies.is_empty() {
            if let Some(s) = LatencySummary::from_samples(&self.raw_source_latencies) {
                self.source_latencies = s;
            }
        }
        if self.transcoded_latencies.is_empty() {
            if let Some(s) = LatencySummary::from_samples(&self.raw_transcoded_latencies) {
                self.transcoded_latencies = s;
            }
        }
        self
    }
}

/// Clamp a reported success rate into `[0, 1]`.
fn normalize_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        return 0.0;
    }
    let rate = if rate > 1.0 { rate / 100.0 } else { rate };
    rate.clamp(0.0, 1.0)
}
