//! Column encodings that outlived more than one schema version.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use crate::error::{Error, Result};

/// Start time as unix nanoseconds, the only range the column holds
/// (1677-09-21 to 2262-04-11). Earlier times, such as the harness's zero
/// time `0001-01-01T00:00:00Z`, mean "not started" and are stored as 0,
/// which reads back as the Unix epoch. Later times are rejected.
pub fn start_time_to_nanos(t: DateTime<Utc>) -> Result<i64> {
    match t.timestamp_nanos_opt() {
        Some(nanos) => Ok(nanos),
        None if t.timestamp() < 0 => Ok(0),
        None => Err(Error::StorageFailure(format!(
            "start time {} is past the storable range",
            t.to_rfc3339()
        ))),
    }
}

/// Raw latency samples as concatenated little-endian i64 nanoseconds.
pub fn encode_latencies(samples: &[Duration]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 8);
    for d in samples {
        let nanos = i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
        buf.extend_from_slice(&nanos.to_le_bytes());
    }
    buf
}

pub fn decode_latencies(blob: &[u8]) -> Result<Vec<Duration>> {
    if blob.len() % 8 != 0 {
        return Err(Error::StorageFailure(format!(
            "latency blob of {} bytes is not a whole number of samples",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            Duration::from_nanos(i64::from_le_bytes(bytes).max(0) as u64)
        })
        .collect())
}

/// Success rate column: v1 rows hold `%f` text, later rows a REAL.
pub fn decode_success_rate(value: Value) -> Result<f64> {
    match value {
        Value::Real(f) => Ok(f),
        Value::Integer(i) => Ok(i as f64),
        Value::Text(s) => s
            .trim()
            .parse()
            .map_err(|e| Error::StorageFailure(format!("success rate '{s}': {e}"))),
        Value::Null => Ok(0.0),
        Value::Blob(_) => Err(Error::StorageFailure(
            "success rate stored as blob".to_string(),
        )),
    }
}

pub fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

pub fn nanos_to_duration(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_blob_layout_is_little_endian_nanos() {
        let blob = encode_latencies(&[Duration::from_nanos(1), Duration::from_nanos(256)]);
        assert_eq!(blob, vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_latencies(&blob).unwrap(),
            vec![Duration::from_nanos(1), Duration::from_nanos(256)]
        );
    }

    #[test]
    fn test_start_time_range() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(start_time_to_nanos(t).unwrap(), t.timestamp() * 1_000_000_000);

        let zero_time: DateTime<Utc> = "0001-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(start_time_to_nanos(zero_time).unwrap(), 0);

        let far_future = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            start_time_to_nanos(far_future),
            Err(Error::StorageFailure(_))
        ));
    }

    #[test]
    fn test_empty_blob_is_no_samples() {
        assert!(decode_latencies(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(
            decode_latencies(&[1, 2, 3]),
            Err(Error::StorageFailure(_))
        ));
    }

    #[test]
    fn test_success_rate_text_and_real() {
        assert_eq!(decode_success_rate(Value::Text("0.875000".into())).unwrap(), 0.875);
        assert_eq!(decode_success_rate(Value::Real(0.5)).unwrap(), 0.5);
        assert_eq!(decode_success_rate(Value::Integer(1)).unwrap(), 1.0);
        assert!(decode_success_rate(Value::Text("n/a".into())).is_err());
    }
}
