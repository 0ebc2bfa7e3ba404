//! SQLite-backed [`ResultStore`].

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension, Row};

use super::codec::{
    decode_latencies, decode_success_rate, duration_to_nanos, encode_latencies, nanos_to_duration,
    start_time_to_nanos,
};
use super::{Pool, ResultStore};
use crate::error::{Error, Result};
use crate::stats::{LatencySummary, ResultRecord, RunId};

const COLUMNS: &str = "baseManifestID, rtmpStreams, mediaStreams, totalSegments, sentSegments,
    downloadedSegments, totalDownloadSegments, failedToDownloadSegments, profilesNum, retries,
    successRate, connectionLost, finished, rawSourceLatencies, rawTranscodedLatencies, gaps,
    startTime, sourceLatAvg, sourceLatP50, sourceLatP95, sourceLatP99,
    transcodedLatAvg, transcodedLatP50, transcodedLatP95, transcodedLatP99";

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run a blocking closure against a pooled connection off the runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::StorageFailure(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert(&self, id: &RunId, record: &ResultRecord) -> Result<()> {
        let id = id.clone();
        let record = record.clone();
        let start_nanos = start_time_to_nanos(record.start_time)?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT OR REPLACE INTO stats ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"
            ))?;
            let src = &record.source_latencies;
            let tc = &record.transcoded_latencies;
            stmt.execute(params![
                id.as_str(),
                record.rtmp_streams,
                record.media_streams,
                record.total_segments_to_send,
                record.sent_segments,
                record.downloaded_segments,
                record.should_have_downloaded_segments,
                record.failed_to_download_segments,
                record.profiles_num,
                record.retries,
                record.success_rate,
                record.connection_lost,
                record.finished,
                encode_latencies(&record.raw_source_latencies),
                encode_latencies(&record.raw_transcoded_latencies),
                record.gaps,
                start_nanos,
                duration_to_nanos(src.avg),
                duration_to_nanos(src.p50),
                duration_to_nanos(src.p95),
                duration_to_nanos(src.p99),
                duration_to_nanos(tc.avg),
                duration_to_nanos(tc.p50),
                duration_to_nanos(tc.p95),
                duration_to_nanos(tc.p99),
            ])?;
            Ok(())
        })
        .await
    }

    async fn select(&self, id: &RunId) -> Result<ResultRecord> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM stats WHERE baseManifestID = ?1"
            ))?;
            let row = stmt
                .query_row(params![id.as_str()], StatsRow::read)
                .optional()?;
            match row {
                Some(row) => row.into_record().map(|(_, record)| record),
                None => Err(Error::NotFound(id)),
            }
        })
        .await
    }

    async fn all(&self) -> Result<Vec<(RunId, ResultRecord)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM stats ORDER BY startTime DESC"
            ))?;
            let rows = stmt.query_map([], StatsRow::read)?;

            let mut all = Vec::new();
            for row in rows {
                match row.map_err(Error::from).and_then(StatsRow::into_record) {
                    Ok(entry) => all.push(entry),
                    // One undecodable row must not hide the rest.
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable stats row"),
                }
            }
            Ok(all)
        })
        .await
    }
}

/// Raw column values, decoded into a [`ResultRecord`] outside the row callback.
struct StatsRow {
    id: String,
    counts: [u32; 11],
    success_rate: Value,
    finished: bool,
    raw_source: Vec<u8>,
    raw_transcoded: Vec<u8>,
    start_time: i64,
    summaries: [i64; 8],
}

impl StatsRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        // Columns in COLUMNS order; v1 rows may hold NULLs.
        let count = |idx: usize| -> rusqlite::Result<u32> {
            Ok(row.get::<_, Option<u32>>(idx)?.unwrap_or(0))
        };
        let counts = [
            count(1)?,
            count(2)?,
            count(3)?,
            count(4)?,
            count(5)?,
            count(6)?,
            count(7)?,
            count(8)?,
            count(9)?,
            count(11)?,
            count(15)?,
        ];
        let mut summaries = [0i64; 8];
        for (i, slot) in summaries.iter_mut().enumerate() {
            *slot = row.get::<_, Option<i64>>(17 + i)?.unwrap_or(0);
        }

        Ok(Self {
            id: row.get(0)?,
            counts,
            success_rate: row.get(10)?,
            finished: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
            raw_source: row.get::<_, Option<Vec<u8>>>(13)?.unwrap_or_default(),
            raw_transcoded: row.get::<_, Option<Vec<u8>>>(14)?.unwrap_or_default(),
            start_time: row.get::<_, Option<i64>>(16)?.unwrap_or(0),
            summaries,
        })
    }

    fn into_record(self) -> Result<(RunId, ResultRecord)> {
        let [rtmp_streams, media_streams, total_segments_to_send, sent_segments, downloaded_segments, should_have_downloaded_segments, failed_to_download_segments, profiles_num, retries, connection_lost, gaps] =
            self.counts;
        let s = self.summaries.map(nanos_to_duration);

        let record = ResultRecord {
            rtmp_streams,
            media_streams,
            total_segments_to_send,
            sent_segments,
            downloaded_segments,
            should_have_downloaded_segments,
            failed_to_download_segments,
            profiles_num,
            retries,
            success_rate: decode_success_rate(self.success_rate)?,
            connection_lost,
            finished: self.finished,
            raw_source_latencies: decode_latencies(&self.raw_source)?,
            raw_transcoded_latencies: decode_latencies(&self.raw_transcoded)?,
            source_latencies: LatencySummary {
                avg: s[0],
                p50: s[1],
                p95: s[2],
                p99: s[3],
            },
            transcoded_latencies: LatencySummary {
                avg: s[4],
                p50: s[5],
                p95: s[6],
                p99: s[7],
            },
            gaps,
            start_time: DateTime::from_timestamp_nanos(self.start_time),
        };
        Ok((RunId::new(self.id), record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_pool;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = open_pool(&dir.path().join("stats.db")).unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn sample(downloaded: u32, start_secs: i64) -> ResultRecord {
        ResultRecord {
            rtmp_streams: 2,
            media_streams: 2,
            total_segments_to_send: 40,
            sent_segments: 40,
            downloaded_segments: downloaded,
            should_have_downloaded_segments: 120,
            profiles_num: 3,
            retries: 1,
            connection_lost: 0,
            finished: true,
            raw_source_latencies: vec![Duration::from_millis(120), Duration::from_millis(80)],
            raw_transcoded_latencies: vec![Duration::from_millis(900)],
            gaps: 1,
            start_time: Utc.timestamp_opt(start_secs, 0).unwrap(),
            ..Default::default()
        }
        .with_derived_fields()
    }

    #[tokio::test]
    async fn test_insert_then_select_is_lossless() {
        let (_dir, store) = temp_store();
        let id = RunId::new("abc");
        let record = sample(90, 1_700_000_000);

        store.insert(&id, &record).await.unwrap();
        assert_eq!(store.select(&id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_harness_zero_start_time_stored_as_epoch() {
        let (_dir, store) = temp_store();
        let id = RunId::new("pending");
        let record = ResultRecord {
            start_time: "0001-01-01T00:00:00Z".parse().unwrap(),
            ..Default::default()
        };

        store.insert(&id, &record).await.unwrap();
        let stored = store.select(&id).await.unwrap();
        assert_eq!(stored.start_time, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(stored.start_time, ResultRecord::default().start_time);
    }

    #[tokio::test]
    async fn test_unstorable_start_time_is_storage_failure() {
        let (_dir, store) = temp_store();
        let id = RunId::new("future");
        let record = ResultRecord {
            start_time: Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap(),
            ..Default::default()
        };

        let err = store.insert(&id, &record).await.unwrap_err();
        assert!(matches!(err, Error::StorageFailure(_)), "got {err:?}");
        assert!(matches!(store.select(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_select_missing_is_not_found() {
        let (_dir, store) = temp_store();
        let err = store.select(&RunId::new("nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id.as_str() == "nope"));
    }

    #[tokio::test]
    async fn test_insert_same_record_twice_is_idempotent() {
        let (_dir, store) = temp_store();
        let id = RunId::new("abc");
        let record = sample(90, 1_700_000_000);

        store.insert(&id, &record).await.unwrap();
        store.insert(&id, &record).await.unwrap();
        assert_eq!(store.select(&id).await.unwrap(), record);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_overwrites_whole_record() {
        let (_dir, store) = temp_store();
        let id = RunId::new("abc");
        store.insert(&id, &sample(90, 1_700_000_000)).await.unwrap();

        let replacement = ResultRecord {
            sent_segments: 5,
            finished: false,
            ..Default::default()
        };
        store.insert(&id, &replacement).await.unwrap();

        let stored = store.select(&id).await.unwrap();
        assert_eq!(stored, replacement);
        assert!(stored.raw_source_latencies.is_empty());
    }

    #[tokio::test]
    async fn test_all_is_newest_first() {
        let (_dir, store) = temp_store();
        store.insert(&RunId::new("old"), &sample(1, 1_000)).await.unwrap();
        store.insert(&RunId::new("new"), &sample(2, 3_000)).await.unwrap();
        store.insert(&RunId::new("mid"), &sample(3, 2_000)).await.unwrap();

        let ids: Vec<String> = store
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_for_different_runs() {
        let (_dir, store) = temp_store();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert(&RunId::new(format!("run-{i}")), &sample(i, i64::from(i)))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.all().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_v1_text_success_rate_is_readable() {
        let (_dir, store) = temp_store();
        {
            let conn = store.pool().get().unwrap();
            conn.execute(
                "INSERT INTO stats (baseManifestID, successRate, finished, startTime)
                 VALUES ('legacy', '0.750000', 1, 0)",
                [],
            )
            .unwrap();
        }
        let record = store.select(&RunId::new("legacy")).await.unwrap();
        assert_eq!(record.success_rate, 0.75);
        assert!(record.finished);
        assert!(record.raw_source_latencies.is_empty());
    }
}
