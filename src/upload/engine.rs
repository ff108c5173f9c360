//! Recording upload engine.
//!
//! A pass checks the gate, settles recordings of excluded numbers,
//! reconciles local state with the server's view, resets stale in-flight
//! rows, then uploads a bounded batch of recordings. Rows still waiting for
//! their file do not take a batch slot. Each file goes up as sequential
//! chunks followed by a finalize call.
//!
//! A file is marked `UPLOADING` before its first chunk. An [`InFlightGuard`]
//! rolls it back to `PENDING` unless the transfer reached a terminal status,
//! so cancellation or a dropped future never leaves a row in flight.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{normalize_phone, CallRecord, RecordingSyncStatus};
use crate::remote::{ChunkAck, RemoteService};
use crate::storage::SharedStore;

use super::chunking::{chunk_count, ChunkReader};
use super::gate::check_gate;
use super::locator::RecordingLocator;

const ACTOR: &str = "upload";

/// Outcome of one upload pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    /// Why the pass did nothing, if the gate was closed.
    pub gated: Option<String>,
    /// Settled as not applicable because the number is excluded.
    pub excluded: usize,
    /// Marked complete from the server's status check.
    pub reconciled: usize,
    /// Stale in-flight rows reset to pending.
    pub reset_stale: usize,
    pub completed: usize,
    pub failed: usize,
    pub not_applicable: usize,
    /// No file yet, still inside the grace window.
    pub waiting_for_file: usize,
    /// Recordings still pending after this pass.
    pub remaining: usize,
}

impl UploadReport {
    /// More work is queued and this pass made progress: run again now.
    #[must_use]
    pub fn needs_rerun(&self) -> bool {
        let progressed = self.completed + self.failed + self.not_applicable > 0;
        progressed && self.remaining > 0
    }
}

/// Terminal result of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Completed,
    Failed,
    NotApplicable,
    WaitingForFile,
}

/// Result of streaming a file's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// All chunks accepted; finalize with this count.
    Sent { total_chunks: u32 },
    /// The server already holds the complete recording.
    AlreadyCompleted,
}

/// Rolls an in-flight recording back to `PENDING` on drop unless disarmed.
struct InFlightGuard<'a> {
    store: &'a SharedStore,
    id: &'a str,
    armed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(store: &'a SharedStore, id: &'a str) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.with(|s| s.rollback_in_flight(self.id)) {
            Ok(true) => debug!(composite_id = %self.id, "Rolled back in-flight recording"),
            Ok(false) => {}
            Err(e) => warn!(composite_id = %self.id, error = %e, "In-flight rollback failed"),
        }
    }
}

/// Uploads call recordings in chunks.
pub struct UploadEngine<R, L> {
    store: SharedStore,
    remote: R,
    locator: L,
    config: EngineConfig,
}

impl<R: RemoteService, L: RecordingLocator> UploadEngine<R, L> {
    pub fn new(store: SharedStore, remote: R, locator: L, config: EngineConfig) -> Self {
        Self {
            store,
            remote,
            locator,
            config,
        }
    }

    /// Run one pass.
    ///
    /// A closed gate is not an error: the report says why and nothing was touched.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, a reconciliation failure, or a store error.
    /// Per-file failures are recorded on the file instead.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<UploadReport> {
        let mut report = UploadReport::default();

        let settings = self.store.with(|s| s.load_settings())?;
        let today = chrono::Utc::now().date_naive();
        if let Err(e) = check_gate(&settings, today) {
            debug!(reason = %e, "Upload gate closed");
            report.gated = Some(e.to_string());
            return Ok(report);
        }

        let settled = self.store.with(|s| s.settle_excluded_recordings())?;
        if !settled.is_empty() {
            info!(count = settled.len(), "Skipped recordings of excluded numbers");
        }
        report.excluded = settled.len();

        report.reconciled = self.reconcile(cancel).await?;

        let stale = i64::try_from(self.config.stale_in_flight.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(stale);
        let reset = self.store.with(|s| s.reset_stale_in_flight(cutoff))?;
        if !reset.is_empty() {
            warn!(count = reset.len(), "Reset stale in-flight recordings");
        }
        report.reset_stale = reset.len();

        let candidates = self.store.with(|s| s.calls_needing_recording_sync(None))?;
        let mut attempted = 0;
        for call in &candidates {
            if attempted >= self.config.upload_batch_size {
                break;
            }
            match self.upload_one(call, cancel).await? {
                FileOutcome::Completed => report.completed += 1,
                FileOutcome::Failed => report.failed += 1,
                FileOutcome::NotApplicable => report.not_applicable += 1,
                FileOutcome::WaitingForFile => {
                    report.waiting_for_file += 1;
                    continue;
                }
            }
            attempted += 1;
        }

        report.remaining = self.store.with(|s| s.count_recordings_needing_sync())?;
        info!(
            completed = report.completed,
            failed = report.failed,
            remaining = report.remaining,
            "Upload pass complete"
        );
        Ok(report)
    }

    /// Mark recordings the server already holds as complete, in one request.
    ///
    /// Covers pending rows and rows left in flight by an interrupted pass,
    /// so nothing the server has is uploaded or finalized again.
    ///
    /// # Errors
    ///
    /// Returns the remote error, `Cancelled`, or a store error.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<usize> {
        let ids: Vec<String> = self.store.with(|s| {
            let excluded = s.excluded_numbers()?;
            let mut calls = s.calls_needing_recording_sync(None)?;
            calls.extend(s.active_recording_syncs()?);
            Ok(calls
                .into_iter()
                .filter(|c| !excluded.contains(&normalize_phone(&c.phone_number)))
                .map(|c| c.composite_id)
                .collect())
        })?;
        if ids.is_empty() {
            return Ok(0);
        }

        let completed = cancel
            .run(self.remote.check_recordings_status(&ids))
            .await?;

        self.store.with(|s| {
            let mut count = 0;
            for id in completed.iter().filter(|id| ids.contains(*id)) {
                s.set_recording_status(id, RecordingSyncStatus::Completed, None, ACTOR)?;
                count += 1;
            }
            if count > 0 {
                info!(count, "Recordings already complete on server");
            }
            Ok(count)
        })
    }

    /// Upload one recording through to a terminal status.
    ///
    /// A call whose number is excluded is settled without any request.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` (after rolling the row back to `PENDING`) or a
    /// store error.
    pub async fn upload_one(
        &self,
        call: &CallRecord,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome> {
        let id = call.composite_id.as_str();

        if self.store.with(|s| s.is_excluded(&call.phone_number))? {
            debug!(composite_id = %id, "Number excluded, recording not sent");
            self.finish(id, RecordingSyncStatus::NotApplicable, None)?;
            return Ok(FileOutcome::NotApplicable);
        }

        let Some(path) = self.resolve_path(call)? else {
            return self.missing_file(call, false);
        };

        self.store
            .with(|s| s.set_recording_status(id, RecordingSyncStatus::Uploading, None, ACTOR))?;
        let mut guard = InFlightGuard::new(&self.store, id);

        let transfer = match self.send_chunks(id, &path, cancel).await {
            Ok(transfer) => transfer,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(Error::FileMissing { .. }) => {
                let outcome = self.missing_file(call, true)?;
                if outcome == FileOutcome::NotApplicable {
                    guard.disarm();
                }
                return Ok(outcome);
            }
            Err(e @ (Error::Database(_) | Error::Other(_))) => return Err(e),
            Err(e) => {
                warn!(composite_id = %id, error = %e, "Chunk upload failed");
                self.finish(id, RecordingSyncStatus::Failed, Some(&e.to_string()))?;
                guard.disarm();
                return Ok(FileOutcome::Failed);
            }
        };

        let outcome = match transfer {
            Transfer::AlreadyCompleted => {
                debug!(composite_id = %id, "Server already has recording");
                self.finish(id, RecordingSyncStatus::Completed, None)?;
                FileOutcome::Completed
            }
            Transfer::Sent { total_chunks } => {
                match cancel
                    .run(self.remote.finalize_upload(id, total_chunks))
                    .await
                {
                    Ok(true) => {
                        self.finish(id, RecordingSyncStatus::Completed, None)?;
                        info!(composite_id = %id, total_chunks, "Recording uploaded");
                        FileOutcome::Completed
                    }
                    Ok(false) => {
                        self.finish(id, RecordingSyncStatus::Failed, Some("finalize not accepted"))?;
                        FileOutcome::Failed
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        warn!(composite_id = %id, error = %e, "Finalize failed");
                        self.finish(id, RecordingSyncStatus::Failed, Some(&e.to_string()))?;
                        FileOutcome::Failed
                    }
                }
            }
        };
        guard.disarm();
        Ok(outcome)
    }

    /// Stream `path` as sequential chunks.
    ///
    /// Checks for cancellation before each chunk. Stops early when the
    /// server reports the recording complete.
    ///
    /// # Errors
    ///
    /// Returns `FileMissing` for an unreadable or empty file, `Cancelled`,
    /// or the first chunk failure.
    pub async fn send_chunks(
        &self,
        id: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let missing = || Error::FileMissing {
            path: path.to_path_buf(),
        };
        let len = tokio::fs::metadata(path).await.map_err(|_| missing())?.len();
        let mut reader = ChunkReader::open(path, self.config.chunk_size)
            .await
            .map_err(|_| missing())?;
        debug!(
            composite_id = %id,
            len,
            expected_chunks = chunk_count(len, self.config.chunk_size),
            "Starting chunked upload"
        );

        let mut sent = 0u32;
        while let Some(chunk) = reader.next_chunk().await? {
            cancel.checkpoint()?;
            let index = chunk.index;
            let len = chunk.bytes.len();
            match cancel
                .run(self.remote.upload_chunk(id, index, chunk.bytes))
                .await?
            {
                ChunkAck::Accepted => sent += 1,
                ChunkAck::AlreadyCompleted => return Ok(Transfer::AlreadyCompleted),
            }
            debug!(composite_id = %id, chunk_index = index, len, "Chunk sent");
        }

        if sent == 0 {
            return Err(missing());
        }
        Ok(Transfer::Sent { total_chunks: sent })
    }

    fn resolve_path(&self, call: &CallRecord) -> Result<Option<PathBuf>> {
        if let Some(stored) = call.local_recording_path.as_deref().map(PathBuf::from) {
            if stored.is_file() {
                return Ok(Some(stored));
            }
        }

        let found = match self.locator.locate(call) {
            Ok(found) => found,
            Err(e) => {
                warn!(composite_id = %call.composite_id, error = %e, "Recording lookup failed");
                None
            }
        };
        if let Some(path) = &found {
            let path_str = path.to_string_lossy();
            self.store
                .with(|s| s.set_recording_path(&call.composite_id, &path_str))?;
        }
        Ok(found)
    }

    /// No usable file: give up after the grace window, else wait.
    fn missing_file(&self, call: &CallRecord, in_flight: bool) -> Result<FileOutcome> {
        let grace = i64::try_from(self.config.recording_grace.as_millis()).unwrap_or(i64::MAX);
        if now_ms().saturating_sub(call.call_timestamp) <= grace {
            debug!(composite_id = %call.composite_id, in_flight, "Recording not available yet");
            return Ok(FileOutcome::WaitingForFile);
        }
        self.finish(
            &call.composite_id,
            RecordingSyncStatus::NotApplicable,
            Some("no recording file found"),
        )?;
        info!(composite_id = %call.composite_id, "No recording after grace window");
        Ok(FileOutcome::NotApplicable)
    }

    fn finish(&self, id: &str, status: RecordingSyncStatus, error: Option<&str>) -> Result<()> {
        self.store
            .with(|s| s.set_recording_status(id, status, error, ACTOR))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
