//! Configuration management.
//!
//! This module resolves the database location and API endpoint, exposes
//! the engine tunables, and holds the device settings together with the
//! applier that merges server-pushed configuration into them.
//!
//! # Resolution
//!
//! Paths and endpoints come from CLI flags first, then `CALLSYNC_*`
//! environment variables, then defaults under `~/.callsync/`.

mod applier;
mod settings;

pub use applier::{AppliedConfig, ConfigApplier};
pub use settings::{
    DeviceInfo, LocalSettings, Pairing, DATE_TRACK_START, FLAG_RECORDING_UPLOAD,
    FLAG_SYNC_ENABLED,
};

use crate::error::{Error, Result};

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the global callsync directory location (`~/.callsync/`).
#[must_use]
pub fn global_callsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".callsync"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `CALLSYNC_TEST_DB=1` (or any non-empty value).
/// This redirects all database operations to an isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("CALLSYNC_TEST_DB")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && value.to_lowercase() != "false"
}

/// Get the test database path (`~/.callsync/test/callsync.db`).
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_callsync_dir().map(|dir| dir.join("test").join("callsync.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `CALLSYNC_TEST_DB` environment variable → uses test database
/// 3. `CALLSYNC_DB` environment variable
/// 4. Global location: `~/.callsync/data/callsync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("CALLSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_callsync_dir().map(|dir| dir.join("data").join("callsync.db"))
}

/// Resolve the sync API base URL.
///
/// # Errors
///
/// Returns `Config` if neither the flag nor `CALLSYNC_API_URL` is set.
pub fn resolve_api_url(explicit: Option<&str>) -> Result<String> {
    if let Some(url) = explicit {
        return Ok(url.to_string());
    }

    match std::env::var("CALLSYNC_API_URL") {
        Ok(url) if !url.trim().is_empty() => Ok(url),
        _ => Err(Error::Config("no api url configured".to_string())),
    }
}

/// Bearer token for the sync API, if any.
#[must_use]
pub fn resolve_api_token() -> Option<String> {
    std::env::var("CALLSYNC_API_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty())
}

/// Tunables shared by both engines and the scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// New calls per `batch_sync_calls` request.
    pub push_batch_size: usize,
    /// Recordings processed per upload pass.
    pub upload_batch_size: usize,
    /// Bytes per recording chunk.
    pub chunk_size: usize,
    /// How long after a call a missing recording is still expected to appear.
    pub recording_grace: Duration,
    /// In-flight recording states older than this are reset to pending.
    pub stale_in_flight: Duration,
    /// Directory scanned for recording files.
    pub recordings_dir: Option<PathBuf>,
    pub metadata_interval: Duration,
    pub upload_interval: Duration,
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            push_batch_size: 100,
            upload_batch_size: 10,
            chunk_size: crate::upload::DEFAULT_CHUNK_SIZE,
            recording_grace: Duration::from_secs(3 * 60 * 60),
            stale_in_flight: Duration::from_secs(30 * 60),
            recordings_dir: None,
            metadata_interval: Duration::from_secs(15 * 60),
            upload_interval: Duration::from_secs(30 * 60),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `CALLSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable is set but not a positive integer.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(n) = env_u64("CALLSYNC_PUSH_BATCH_SIZE")? {
            config.push_batch_size = to_usize(n);
        }
        if let Some(n) = env_u64("CALLSYNC_UPLOAD_BATCH_SIZE")? {
            config.upload_batch_size = to_usize(n);
        }
        if let Some(n) = env_u64("CALLSYNC_CHUNK_SIZE")? {
            config.chunk_size = to_usize(n);
        }
        if let Some(mins) = env_u64("CALLSYNC_RECORDING_GRACE_MINUTES")? {
            config.recording_grace = Duration::from_secs(mins * 60);
        }
        if let Some(mins) = env_u64("CALLSYNC_STALE_IN_FLIGHT_MINUTES")? {
            config.stale_in_flight = Duration::from_secs(mins * 60);
        }
        if let Some(mins) = env_u64("CALLSYNC_METADATA_INTERVAL_MINUTES")? {
            config.metadata_interval = Duration::from_secs(mins * 60);
        }
        if let Some(mins) = env_u64("CALLSYNC_UPLOAD_INTERVAL_MINUTES")? {
            config.upload_interval = Duration::from_secs(mins * 60);
        }
        if let Ok(dir) = std::env::var("CALLSYNC_RECORDINGS_DIR") {
            if !dir.trim().is_empty() {
                config.recordings_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value = parse_positive(&raw)
                .ok_or_else(|| Error::Config(format!("{name} must be a positive integer, got '{raw}'")))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

fn parse_positive(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/callsync.db");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_test_db_path_is_separate() {
        let global = global_callsync_dir().unwrap();
        let test = test_db_path().unwrap();

        assert!(test.to_string_lossy().contains("/test/"));
        assert!(test.ends_with("callsync.db"));
        assert_ne!(global.join("data").join("callsync.db"), test);
    }

    #[test]
    fn test_explicit_api_url_wins() {
        assert_eq!(
            resolve_api_url(Some("https://api.example.test")).unwrap(),
            "https://api.example.test"
        );
    }

    #[test]
    fn test_truthy_parsing() {
        assert!(!is_truthy("0"));
        assert!(!is_truthy("FALSE"));
        assert!(!is_truthy(""));
        assert!(is_truthy("1"));
        assert!(is_truthy("yes"));
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive(" 42 "), Some(42));
        assert_eq!(parse_positive("0"), None);
        assert_eq!(parse_positive("-3"), None);
        assert_eq!(parse_positive("abc"), None);
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.push_batch_size, 100);
        assert_eq!(config.upload_batch_size, 10);
        assert_eq!(config.chunk_size, 1_048_576);
        assert_eq!(config.recording_grace, Duration::from_secs(10_800));
    }
}
