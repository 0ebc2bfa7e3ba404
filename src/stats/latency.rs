//! Segment latency samples and their percentile summary.
//!
//! The stream-tester reports durations as integer nanoseconds, both for raw
//! per-segment samples and for precomputed summaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Average and tail latencies over a set of segment samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySummary {
    #[serde(with = "nanos")]
    pub avg: Duration,
    #[serde(rename = "p_50", with = "nanos")]
    pub p50: Duration,
    #[serde(rename = "p_95", with = "nanos")]
    pub p95: Duration,
    #[serde(rename = "p_99", with = "nanos")]
    pub p99: Duration,
}

impl LatencySummary {
    /// Summarize raw samples. Percentiles use the nearest-rank method.
    /// Returns `None` for an empty sample set.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
        let avg = total / sorted.len() as u128;

        Some(Self {
            avg: Duration::from_nanos(avg as u64),
            p50: nearest_rank(&sorted, 50),
            p95: nearest_rank(&sorted, 95),
            p99: nearest_rank(&sorted, 99),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn nearest_rank(sorted: &[Duration], percentile: usize) -> Duration {
    // rank = ceil(p/100 * n), 1-based
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

/// Serde adapter: `Duration` as integer nanoseconds.
pub mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}

/// Serde adapter: `Vec<Duration>` as an array of integer nanoseconds.
/// A JSON `null` (nil slice on the harness side) reads as empty.
pub mod nanos_vec {
    use std::time::Duration;

    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[Duration], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(v.len()))?;
        for d in v {
            seq.serialize_element(&(d.as_nanos() as u64))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Duration>, D::Error> {
        let raw = Option::<Vec<u64>>::deserialize(d)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .map(Duration::from_nanos)
            .collect())
    }
}
