//! Run configuration sent to the stream-tester, and the cell holding the
//! current one.

pub mod settings;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use self::settings::Settings;

/// Parameters of one batch of simulated broadcasts.
///
/// Serialized as the body of the harness's `POST /start_streams`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Broadcaster host to stream to.
    pub host: String,
    /// Broadcaster RTMP ingest port.
    pub rtmp: u16,
    /// Broadcaster HTTP port media is downloaded from.
    pub media: u16,
    /// Source video, relative to the stream-tester's working directory.
    pub file_name: String,
    /// How many times the source is streamed back to back.
    pub repeat: u32,
    /// Concurrent streams per run.
    pub simultaneous: u32,
    /// Transcoding profiles the broadcaster is configured with.
    pub profiles_num: u32,
    pub do_not_clear_stats: bool,
    pub measure_latency: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            rtmp: 1935,
            media: 8935,
            file_name: "bbb_sunflower_1080p_30fps_normal_t02.mp4".to_string(),
            repeat: 1,
            simultaneous: 2,
            profiles_num: 3,
            do_not_clear_stats: false,
            measure_latency: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".into()));
        }
        if self.file_name.trim().is_empty() {
            return Err(Error::InvalidConfig("file_name must not be empty".into()));
        }
        if self.repeat == 0 {
            return Err(Error::InvalidConfig("repeat must be at least 1".into()));
        }
        if self.simultaneous == 0 {
            return Err(Error::InvalidConfig("simultaneous must be at least 1".into()));
        }
        Ok(())
    }
}

/// Holds the current [`RunConfig`] as an immutable shared snapshot.
///
/// `set` swaps in a new snapshot; `get` hands out the one current at the
/// time of the call. Runs already dispatched keep whatever snapshot they
/// were started with.
#[derive(Debug)]
pub struct ConfigCell {
    current: RwLock<Arc<RunConfig>>,
}

impl ConfigCell {
    pub fn new(config: RunConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn get(&self) -> Arc<RunConfig> {
        Arc::clone(&self.current.read())
    }

    pub fn set(&self, config: RunConfig) {
        let next = Arc::new(config);
        *self.current.write() = next;
    }
}
