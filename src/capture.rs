//! Capture importer.
//!
//! Turns native call-log entries into [`CallRecord`]s keyed by a
//! deterministic composite id. Importing the same entry twice is a no-op.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::Result;
use crate::identity::CallerIdentityResolver;
use crate::model::{CallRecord, normalize_phone};
use crate::storage::SqliteStorage;

/// One row of the device call log, as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCallEntry {
    pub number: String,
    #[serde(default)]
    pub cached_name: Option<String>,
    /// Platform type code, interpreted by the [`CallerIdentityResolver`].
    #[serde(rename = "type")]
    pub call_type: i32,
    /// Seconds.
    pub duration: i64,
    /// Call start (Unix milliseconds).
    pub date: i64,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

/// Deterministic identity of a call.
///
/// A pure function of device-local data, so re-scanning the call log
/// always yields the same id for the same entry.
#[must_use]
pub fn composite_id(device_id: &str, timestamp: i64, number: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_phone(number).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("call_{}", &digest[..24])
}

/// Outcome of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub scanned: usize,
    pub created: usize,
    pub existing: usize,
    /// Older than the organization's tracking start date.
    pub before_start: usize,
    /// Types the resolver does not track.
    pub untracked: usize,
}

/// Imports native entries into the store.
pub struct CaptureImporter<R> {
    resolver: R,
    device_id: String,
}

impl<R: CallerIdentityResolver> CaptureImporter<R> {
    pub fn new(resolver: R, device_id: &str) -> Self {
        Self {
            resolver,
            device_id: device_id.to_string(),
        }
    }

    /// Upsert every entry on or after `track_start`.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails.
    pub fn import(
        &self,
        storage: &mut SqliteStorage,
        entries: &[NativeCallEntry],
        track_start: Option<NaiveDate>,
    ) -> Result<ImportStats> {
        let cutoff = track_start
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|start| start.and_utc().timestamp_millis());

        let mut stats = ImportStats::default();
        for entry in entries {
            stats.scanned += 1;

            if cutoff.is_some_and(|c| entry.date < c) {
                stats.before_start += 1;
                continue;
            }
            let Some(call_type) = self.resolver.resolve_call_type(entry) else {
                stats.untracked += 1;
                continue;
            };

            let id = composite_id(&self.device_id, entry.date, &entry.number);
            let mut record = CallRecord::new(
                id,
                entry.number.clone(),
                call_type,
                entry.duration.max(0),
                entry.date,
            );
            if let Some(name) = entry.cached_name.as_deref().filter(|n| !n.is_empty()) {
                record = record.with_contact_name(name);
            }
            if let Some(line) = self.resolver.resolve_device_phone(entry) {
                record = record.with_device_phone(&line);
            }

            if storage.upsert_imported_call(&record)? {
                debug!(composite_id = %record.composite_id, "Imported call");
                stats.created += 1;
            } else {
                stats.existing += 1;
            }
        }

        info!(
            scanned = stats.scanned,
            created = stats.created,
            before_start = stats.before_start,
            "Call log import complete"
        );
        Ok(stats)
    }
}
