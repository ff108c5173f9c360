//! Command implementations.

pub mod daemon;
pub mod edit;
pub mod import;
pub mod pair;
pub mod pass;
pub mod status;

use std::future::Future;
use std::path::PathBuf;

use crate::cancel::CancellationToken;
use crate::config::{resolve_api_token, resolve_api_url, resolve_db_path, EngineConfig};
use crate::error::{Error, Result};
use crate::remote::HttpRemote;
use crate::storage::SqliteStorage;

fn db_location(db_path: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the callsync directory".to_string()))
}

/// Open the store, failing if nothing was imported or paired yet.
pub(crate) fn open_existing(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    let path = db_location(db_path)?;
    if !path.exists() {
        return Err(Error::NotInitialized { path });
    }
    SqliteStorage::open(&path)
}

/// Open the store, creating the database and its directory if needed.
pub(crate) fn open_or_create(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    let path = db_location(db_path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStorage::open(&path)
}

pub(crate) fn http_remote(api_url: Option<&str>, config: &EngineConfig) -> Result<HttpRemote> {
    let url = resolve_api_url(api_url)?;
    HttpRemote::new(&url, resolve_api_token(), config.http_timeout)
}

pub(crate) fn recordings_dir(explicit: Option<&PathBuf>, config: &EngineConfig) -> Result<PathBuf> {
    explicit
        .cloned()
        .or_else(|| config.recordings_dir.clone())
        .ok_or_else(|| Error::Config("no recordings directory configured".to_string()))
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

/// Drive `fut` to completion, tripping `cancel` on Ctrl-C and letting the
/// pass wind down at its next checkpoint.
pub(crate) async fn interruptible<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping after the current step");
            cancel.cancel();
            fut.await
        }
    }
}

pub(crate) fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
