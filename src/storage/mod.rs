//! Result persistence -- the store contract, SQLite pool, schema, queries.

pub mod codec;
pub mod schema;
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::{Error, Result};
use crate::stats::{ResultRecord, RunId};

pub use self::sqlite::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Durable mapping from run identifier to its latest stats record.
///
/// Must be safe to call concurrently for different identifiers; concurrent
/// writes to the same identifier are last-write-wins.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or fully replace the record for `id`.
    async fn insert(&self, id: &RunId, record: &ResultRecord) -> Result<()>;

    /// Fetch one record, or [`Error::NotFound`].
    async fn select(&self, id: &RunId) -> Result<ResultRecord>;

    /// Every stored record, newest start time first.
    async fn all(&self) -> Result<Vec<(RunId, ResultRecord)>>;
}

/// Open (or create) the SQLite database and return a migrated connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::StorageFailure(format!("error making {}: {e}", dir.display()))
        })?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let mut conn = pool.get()?;
    schema::migrate(&mut conn)?;

    Ok(pool)
}
