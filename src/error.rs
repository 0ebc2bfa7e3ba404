//! Error taxonomy shared by the engine, harness client, and storage layer.

use thiserror::Error;

use crate::stats::RunId;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure or timeout reaching the harness.
    #[error("stream-tester unreachable: {0}")]
    RemoteUnavailable(#[source] reqwest::Error),

    /// Harness reachable but answered with a failure.
    #[error("stream-tester rejected request: {0}")]
    RemoteRejected(String),

    #[error("malformed response from stream-tester: {0}")]
    MalformedResponse(String),

    #[error("no stats recorded for run {0}")]
    NotFound(RunId),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("unable to stop streams: {0}")]
    StopFailed(String),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("schedule is {current}; cannot {action}")]
    InvalidState {
        current: &'static str,
        action: &'static str,
    },
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::StorageFailure(e.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::StorageFailure(format!("connection pool: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
