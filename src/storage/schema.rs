//! Database schema and migrations.
//!
//! v1 is the layout the first stream-sender releases wrote: raw latency
//! blobs only, success rate as text, no real primary key. v2 adds the
//! latency summary columns and a unique index on the manifest ID.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::codec::{decode_latencies, duration_to_nanos};
use crate::error::Result;
use crate::stats::LatencySummary;

pub const CURRENT_VERSION: i64 = 2;

const V1_STATS: &str = "CREATE TABLE IF NOT EXISTS stats (
        baseManifestID TEXT PRIMARY KEY,
        rtmpStreams INTEGER,
        mediaStreams INTEGER,
        totalSegments INTEGER,
        sentSegments INTEGER,
        downloadedSegments INTEGER,
        totalDownloadSegments INTEGER,
        failedToDownloadSegments INTEGER,
        profilesNum INTEGER,
        retries INTEGER,
        successRate STRING,
        connectionLost INTEGER,
        finished BOOLEAN,
        rawSourceLatencies BLOB,
        rawTranscodedLatencies BLOB,
        gaps INTEGER,
        startTime INTEGER
    )";

const V2_COLUMNS: [&str; 8] = [
    "sourceLatAvg",
    "sourceLatP50",
    "sourceLatP95",
    "sourceLatP99",
    "transcodedLatAvg",
    "transcodedLatP50",
    "transcodedLatP95",
    "transcodedLatP99",
];

/// Run all pending migrations.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let mut version = current_version(conn)?;

    // Databases written before versioning existed already hold a v1 table.
    if version == 0 && table_exists(conn, "stats")? {
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        version = 1;
        info!("adopted unversioned stats table as schema v1");
    }

    if version < 1 {
        let tx = conn.transaction()?;
        tx.execute_batch(V1_STATS)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
        version = 1;
    }

    if version < 2 {
        migrate_v2(conn)?;
        info!(version = CURRENT_VERSION, "stats schema migrated");
    }

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    for column in V2_COLUMNS {
        tx.execute(
            &format!("ALTER TABLE stats ADD COLUMN {column} INTEGER NOT NULL DEFAULT 0"),
            [],
        )?;
    }

    // Early releases declared no usable key, so replaced rows piled up.
    tx.execute(
        "DELETE FROM stats WHERE rowid NOT IN
            (SELECT MAX(rowid) FROM stats GROUP BY baseManifestID)",
        [],
    )?;
    tx.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_stats_manifest ON stats(baseManifestID);
         CREATE INDEX IF NOT EXISTS idx_stats_start ON stats(startTime);",
    )?;

    // Backfill summaries from the raw samples.
    let rows: Vec<(String, Option<Vec<u8>>, Option<Vec<u8>>)> = {
        let mut stmt = tx.prepare(
            "SELECT baseManifestID, rawSourceLatencies, rawTranscodedLatencies FROM stats",
        )?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        mapped.collect::<std::result::Result<_, _>>()?
    };

    for (id, source, transcoded) in rows {
        let source = summarize_blob(source.as_deref())?;
        let transcoded = summarize_blob(transcoded.as_deref())?;
        tx.execute(
            "UPDATE stats SET
                sourceLatAvg = ?2, sourceLatP50 = ?3, sourceLatP95 = ?4, sourceLatP99 = ?5,
                transcodedLatAvg = ?6, transcodedLatP50 = ?7, transcodedLatP95 = ?8, transcodedLatP99 = ?9
             WHERE baseManifestID = ?1",
            params![
                id,
                duration_to_nanos(source.avg),
                duration_to_nanos(source.p50),
                duration_to_nanos(source.p95),
                duration_to_nanos(source.p99),
                duration_to_nanos(transcoded.avg),
                duration_to_nanos(transcoded.p50),
                duration_to_nanos(transcoded.p95),
                duration_to_nanos(transcoded.p99),
            ],
        )?;
    }

    tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    tx.commit()?;
    Ok(())
}

fn summarize_blob(blob: Option<&[u8]>) -> Result<LatencySummary> {
    let samples = decode_latencies(blob.unwrap_or_default())?;
    Ok(LatencySummary::from_samples(&samples).unwrap_or_default())
}
