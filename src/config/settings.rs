//! TOML settings for the streamsender daemon.
//!
//! Layering: an explicit `--config` path, else `STREAMSENDER_CONFIG`, else
//! `/etc/streamsender/streamsender.toml`, else compiled-in defaults. CLI
//! flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::RunConfig;

const CONFIG_ENV: &str = "STREAMSENDER_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/streamsender/streamsender.toml";

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub harness: HarnessSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    /// Initial run configuration; replaceable at runtime via the control plane.
    #[serde(default)]
    pub run: RunConfig,
}

impl Settings {
    /// Load settings from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded streamsender configuration");
        Ok(settings)
    }

    /// Reject periods the schedule and poll timers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be greater than zero");
        }
        if self.schedule.poll_interval_secs == 0 {
            bail!("schedule.poll_interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Resolve settings. An explicitly requested file must load; the
    /// environment and system locations fall through to defaults on error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(settings) => return Ok(settings),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "{CONFIG_ENV} set but file could not be loaded, trying fallback"
                ),
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(settings) => return Ok(settings),
                Err(e) => warn!(
                    path = %system_path.display(),
                    error = %e,
                    "system config file exists but could not be loaded, using defaults"
                ),
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Control-plane HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "localhost:5000".to_string(),
        }
    }
}

/// Where the stream-tester runs and how long to wait on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// `host:port`, or a full base URL.
    pub address: String,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            address: "localhost:3001".to_string(),
            timeout_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Period between scheduled runs (seconds).
    pub interval_secs: u64,
    /// Wait before the first scheduled run, giving the harness time to boot.
    pub startup_delay_secs: u64,
    /// Wait before each status poll of an in-flight run.
    pub poll_interval_secs: u64,
    /// Give up on a run after this many unfinished polls. Unset polls forever.
    pub max_poll_attempts: Option<u32>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            startup_delay_secs: 60,
            poll_interval_secs: 30,
            max_poll_attempts: None,
        }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/tmp/streamsender/streamsender.db"),
        }
    }
}

/// Parse `"1h"`, `"30m"`, `"90s"` or bare seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (digits, scale) = match s.char_indices().last() {
        Some((i, 'h')) => (&s[..i], 3600),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 's')) => (&s[..i], 1),
        _ => (s, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 1h, 30m, 90s)"))?;
    if value == 0 {
        return Err(format!("duration '{s}' must be greater than zero"));
    }
    let secs = value
        .checked_mul(scale)
        .ok_or_else(|| format!("duration '{s}' is too large"))?;
    Ok(Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
