//! SQLite storage implementation.
//!
//! All multi-row writes go through [`SqliteStorage::mutate`], which wraps
//! them in an IMMEDIATE transaction and flushes the audit events recorded
//! on the [`MutationContext`] before committing.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;

use crate::config::LocalSettings;
use crate::error::{Error, Result};
use crate::model::{
    CallRecord, CallType, MetadataSyncStatus, PersonRecord, RecordingSyncStatus, normalize_phone,
};
use crate::remote::{CallUpdate, PersonUpdate};
use crate::storage::events::{Event, EventType, get_events, insert_event};
use crate::storage::schema::apply_schema;

const KEY_LAST_SYNC_TIME: &str = "last_sync_time";
const KEY_SETTINGS: &str = "settings";

const CALL_COLUMNS: &str = "composite_id, phone_number, contact_name, call_type, duration, \
     call_timestamp, device_phone, note, reviewed, label, metadata_sync_status, \
     recording_sync_status, local_recording_path, sync_error, synced_at, acked_updated_at, \
     recording_status_changed_at, created_at, updated_at";

const PERSON_COLUMNS: &str =
    "phone_number, contact_name, person_note, label, sync_pending, last_call_composite_id, updated_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation.
///
/// Passed to mutation closures to record audit events that are written
/// in the same transaction as the change itself.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Component performing the operation (`capture`, `sync`, `upload`, `user`).
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }
}

/// Result of merging one server patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The patch was newer and has been written.
    Applied,
    /// The local copy is as new or newer.
    Stale,
    /// No local record with that identity.
    Unknown,
}

/// Calls the metadata engine has to push, split by endpoint.
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    /// Never acknowledged; pushed in batches.
    pub new: Vec<CallRecord>,
    /// Acknowledged before and modified since; pushed one by one.
    pub changed: Vec<CallRecord>,
}

/// A call the server acknowledged, with the `updated_at` that was pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub composite_id: String,
    pub pushed_updated_at: i64,
}

/// Local annotation edit of a call. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CallAnnotation {
    pub note: Option<String>,
    pub reviewed: Option<bool>,
    pub label: Option<String>,
    pub contact_name: Option<String>,
}

/// Local annotation edit of a person. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PersonEdit {
    pub contact_name: Option<String>,
    pub person_note: Option<String>,
    pub label: Option<String>,
}

/// Counts shown by `callsync status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub total_calls: usize,
    pub metadata: BTreeMap<String, usize>,
    pub recording: BTreeMap<String, usize>,
    pub pending_persons: usize,
    pub excluded_contacts: usize,
    pub last_sync_time: Option<i64>,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// Begins an IMMEDIATE transaction, runs the closure, writes the
    /// recorded audit events, then commits. Any error rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(result)
    }

    // ==================
    // Call Operations
    // ==================

    /// Insert a captured call, or fill in blanks on an existing one.
    ///
    /// Re-importing an existing composite id never touches annotations or
    /// sync state, so capture can safely re-scan the whole call log.
    /// Returns `true` if a new row was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_imported_call(&mut self, call: &CallRecord) -> Result<bool> {
        self.mutate("upsert_imported_call", "capture", |tx, ctx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM calls WHERE composite_id = ?1",
                    [&call.composite_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            if exists {
                tx.execute(
                    "UPDATE calls SET contact_name = COALESCE(contact_name, ?2),
                                      device_phone = COALESCE(device_phone, ?3)
                     WHERE composite_id = ?1",
                    params![call.composite_id, call.contact_name, call.device_phone],
                )?;
            } else {
                tx.execute(
                    &format!(
                        "INSERT INTO calls ({CALL_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                    ),
                    params![
                        call.composite_id,
                        call.phone_number,
                        call.contact_name,
                        call.call_type.as_str(),
                        call.duration,
                        call.call_timestamp,
                        call.device_phone,
                        call.note,
                        call.reviewed,
                        call.label,
                        call.metadata_sync_status.as_str(),
                        call.recording_sync_status.as_str(),
                        call.local_recording_path,
                        call.sync_error,
                        call.synced_at,
                        call.acked_updated_at,
                        call.recording_status_changed_at,
                        call.created_at,
                        call.updated_at,
                    ],
                )?;
                ctx.record_change(
                    "call",
                    &call.composite_id,
                    EventType::CallImported,
                    None,
                    Some(call.recording_sync_status.as_str().to_string()),
                );
            }

            tx.execute(
                "UPDATE persons SET last_call_composite_id = ?1
                 WHERE phone_number = ?2
                   AND (last_call_composite_id IS NULL
                        OR COALESCE((SELECT call_timestamp FROM calls
                                     WHERE composite_id = persons.last_call_composite_id), 0) <= ?3)",
                params![call.composite_id, call.phone_number, call.call_timestamp],
            )?;

            Ok(!exists)
        })
    }

    /// Get a call by composite id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_call(&self, id: &str) -> Result<Option<CallRecord>> {
        let call = self
            .conn
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE composite_id = ?1"),
                [id],
                map_call_row,
            )
            .optional()?;
        Ok(call)
    }

    fn require_call(&self, id: &str) -> Result<CallRecord> {
        self.get_call(id)?
            .ok_or_else(|| Error::CallNotFound { id: id.to_string() })
    }

    /// List calls, newest first.
    ///
    /// With `unsynced_only`, only calls with outstanding metadata or
    /// recording work are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_calls(&self, unsynced_only: bool, limit: Option<u32>) -> Result<Vec<CallRecord>> {
        let filter = if unsynced_only {
            "WHERE metadata_sync_status != 'SYNCED'
                OR acked_updated_at IS NULL
                OR updated_at > acked_updated_at
                OR recording_sync_status IN ('PENDING', 'COMPRESSING', 'UPLOADING', 'FAILED')"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM calls {filter}
             ORDER BY call_timestamp DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit.unwrap_or(50)], map_call_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Calls whose metadata has not been acknowledged at its current version.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn calls_needing_metadata_sync(&self) -> Result<PendingCalls> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE metadata_sync_status != 'SYNCED'
                OR acked_updated_at IS NULL
                OR updated_at > acked_updated_at
             ORDER BY call_timestamp ASC, composite_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_call_row)?;

        let mut pending = PendingCalls::default();
        for row in rows {
            let call = row?;
            if call.is_new() {
                pending.new.push(call);
            } else {
                pending.changed.push(call);
            }
        }
        Ok(pending)
    }

    /// Recordings waiting for upload, oldest call first.
    ///
    /// Only calls whose metadata the server already holds are eligible.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn calls_needing_recording_sync(&self, limit: Option<u32>) -> Result<Vec<CallRecord>> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE recording_sync_status = 'PENDING' AND metadata_sync_status = 'SYNCED'
             ORDER BY call_timestamp ASC, composite_id ASC
             LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([i64::from(limit.unwrap_or(u32::MAX))], map_call_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Number of recordings [`calls_needing_recording_sync`](Self::calls_needing_recording_sync) would return without a limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_recordings_needing_sync(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM calls
             WHERE recording_sync_status = 'PENDING' AND metadata_sync_status = 'SYNCED'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Recordings left in an in-flight state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn active_recording_syncs(&self) -> Result<Vec<CallRecord>> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE recording_sync_status IN ('COMPRESSING', 'UPLOADING')
             ORDER BY call_timestamp ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_call_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Mark calls acknowledged by a batch push.
    ///
    /// A row edited after it was read for the push keeps its newer
    /// `updated_at`, so it is picked up again as a changed call.
    /// Returns how many of the acknowledged calls now wait for a recording upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_calls_synced(&mut self, acks: &[Acknowledgement], server_time: i64) -> Result<usize> {
        self.mutate("mark_calls_synced", "sync", |tx, ctx| {
            let mut eligible = 0;
            for ack in acks {
                let updated = tx.execute(
                    "UPDATE calls SET metadata_sync_status = 'SYNCED', sync_error = NULL,
                                      synced_at = ?2, acked_updated_at = ?3
                     WHERE composite_id = ?1
                       AND (acked_updated_at IS NULL OR acked_updated_at <= ?3)",
                    params![ack.composite_id, server_time, ack.pushed_updated_at],
                )?;
                if updated == 0 {
                    continue;
                }
                ctx.record_event("call", &ack.composite_id, EventType::MetadataSynced);

                let waiting: bool = tx.query_row(
                    "SELECT duration > 0 AND recording_sync_status = 'PENDING'
                     FROM calls WHERE composite_id = ?1",
                    [&ack.composite_id],
                    |row| row.get(0),
                )?;
                if waiting {
                    eligible += 1;
                }
            }
            Ok(eligible)
        })
    }

    /// Mark one changed call acknowledged.
    ///
    /// Conditional on the row still carrying `pushed_updated_at`. Returns
    /// `false` when a newer local edit arrived mid-flight; the edit stays armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_call_acknowledged(
        &mut self,
        id: &str,
        pushed_updated_at: i64,
        server_time: i64,
    ) -> Result<bool> {
        self.mutate("mark_call_acknowledged", "sync", |tx, ctx| {
            let updated = tx.execute(
                "UPDATE calls SET metadata_sync_status = 'SYNCED', sync_error = NULL,
                                  synced_at = ?3, acked_updated_at = ?2
                 WHERE composite_id = ?1 AND updated_at = ?2",
                params![id, pushed_updated_at, server_time],
            )?;
            if updated == 0 {
                tx.execute(
                    "UPDATE calls SET synced_at = ?3, acked_updated_at = ?2
                     WHERE composite_id = ?1 AND acked_updated_at < ?2",
                    params![id, pushed_updated_at, server_time],
                )?;
                return Ok(false);
            }
            ctx.record_event("call", id, EventType::MetadataSynced);
            Ok(true)
        })
    }

    /// Capture a server rejection on calls' metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_calls_failed(&mut self, ids: &[String], error: &str) -> Result<usize> {
        self.mutate("mark_calls_failed", "sync", |tx, ctx| {
            let mut count = 0;
            for id in ids {
                let updated = tx.execute(
                    "UPDATE calls SET metadata_sync_status = 'FAILED', sync_error = ?2
                     WHERE composite_id = ?1",
                    params![id, error],
                )?;
                if updated > 0 {
                    count += updated;
                    ctx.events.push(
                        Event::new("call", id, EventType::MetadataFailed, &ctx.actor)
                            .with_comment(error),
                    );
                }
            }
            Ok(count)
        })
    }

    /// Capture a server rejection on one call's metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_call_failed(&mut self, id: &str, error: &str) -> Result<()> {
        self.mark_calls_failed(&[id.to_string()], error).map(|_| ())
    }

    /// Settle a call whose number is excluded without sending it.
    ///
    /// The record is marked synced at its current version so it never
    /// re-enters the push queue, and its recording is never uploaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_call_excluded(&mut self, id: &str) -> Result<()> {
        let now = now_ms();
        self.mutate("mark_call_excluded", "sync", |tx, ctx| {
            tx.execute(
                "UPDATE calls SET metadata_sync_status = 'SYNCED', sync_error = NULL,
                                  acked_updated_at = updated_at,
                                  recording_status_changed_at = CASE
                                      WHEN recording_sync_status IN ('COMPLETED', 'NOT_APPLICABLE')
                                      THEN recording_status_changed_at ELSE ?2 END,
                                  recording_sync_status = CASE
                                      WHEN recording_sync_status = 'COMPLETED'
                                      THEN recording_sync_status ELSE 'NOT_APPLICABLE' END
                 WHERE composite_id = ?1",
                params![id, now],
            )?;
            ctx.record_event("call", id, EventType::MetadataExcluded);
            Ok(())
        })
    }

    /// Move a recording through its lifecycle.
    ///
    /// Setting the current status again is a no-op. `FAILED` stores
    /// `error`; `COMPLETED` clears any previous error.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound` or `InvalidTransition`.
    pub fn set_recording_status(
        &mut self,
        id: &str,
        next: RecordingSyncStatus,
        error: Option<&str>,
        actor: &str,
    ) -> Result<()> {
        let now = now_ms();
        self.mutate("set_recording_status", actor, |tx, ctx| {
            let current = read_recording_status(tx, id)?;
            if current == next {
                return Ok(());
            }
            if !current.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    id: id.to_string(),
                    from: current.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }

            match next {
                RecordingSyncStatus::Failed => tx.execute(
                    "UPDATE calls SET recording_sync_status = ?2, recording_status_changed_at = ?3,
                                      sync_error = ?4
                     WHERE composite_id = ?1",
                    params![id, next.as_str(), now, error],
                )?,
                RecordingSyncStatus::Completed => tx.execute(
                    "UPDATE calls SET recording_sync_status = ?2, recording_status_changed_at = ?3,
                                      sync_error = NULL
                     WHERE composite_id = ?1",
                    params![id, next.as_str(), now],
                )?,
                _ => tx.execute(
                    "UPDATE calls SET recording_sync_status = ?2, recording_status_changed_at = ?3
                     WHERE composite_id = ?1",
                    params![id, next.as_str(), now],
                )?,
            };

            let mut event = Event::new("call", id, recording_event(next), &ctx.actor)
                .with_values(Some(current.as_str().to_string()), Some(next.as_str().to_string()));
            if let Some(message) = error {
                event = event.with_comment(message);
            }
            ctx.events.push(event);
            Ok(())
        })
    }

    /// Roll an interrupted upload back to `PENDING`.
    ///
    /// Only rows still in an in-flight state are touched. Returns whether
    /// a row was reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn rollback_in_flight(&mut self, id: &str) -> Result<bool> {
        let now = now_ms();
        self.mutate("rollback_in_flight", "upload", |tx, ctx| {
            let updated = tx.execute(
                "UPDATE calls SET recording_sync_status = 'PENDING', recording_status_changed_at = ?2
                 WHERE composite_id = ?1 AND recording_sync_status IN ('COMPRESSING', 'UPLOADING')",
                params![id, now],
            )?;
            if updated > 0 {
                ctx.record_event("call", id, EventType::RecordingReset);
            }
            Ok(updated > 0)
        })
    }

    /// Reset recordings stuck in an in-flight state since before `cutoff` (Unix ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn reset_stale_in_flight(&mut self, cutoff: i64) -> Result<Vec<String>> {
        let now = now_ms();
        self.mutate("reset_stale_in_flight", "upload", |tx, ctx| {
            let ids: Vec<String> = tx
                .prepare(
                    "SELECT composite_id FROM calls
                     WHERE recording_sync_status IN ('COMPRESSING', 'UPLOADING')
                       AND recording_status_changed_at < ?1",
                )?
                .query_map([cutoff], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            for id in &ids {
                tx.execute(
                    "UPDATE calls SET recording_sync_status = 'PENDING', recording_status_changed_at = ?2
                     WHERE composite_id = ?1",
                    params![id, now],
                )?;
                ctx.events.push(
                    Event::new("call", id, EventType::RecordingReset, &ctx.actor)
                        .with_comment("stale in-flight state"),
                );
            }
            Ok(ids)
        })
    }

    /// Remember where a call's recording file was found.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_recording_path(&mut self, id: &str, path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE calls SET local_recording_path = ?2 WHERE composite_id = ?1",
            params![id, path],
        )?;
        Ok(())
    }

    /// Manually re-queue a failed recording.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound`, or `InvalidTransition` if the recording is not `FAILED`.
    pub fn retry_recording(&mut self, id: &str) -> Result<()> {
        let now = now_ms();
        self.mutate("retry_recording", "user", |tx, ctx| {
            let current = read_recording_status(tx, id)?;
            if current != RecordingSyncStatus::Failed {
                return Err(Error::InvalidTransition {
                    id: id.to_string(),
                    from: current.as_str().to_string(),
                    to: RecordingSyncStatus::Pending.as_str().to_string(),
                });
            }
            tx.execute(
                "UPDATE calls SET recording_sync_status = 'PENDING', recording_status_changed_at = ?2,
                                  sync_error = NULL
                 WHERE composite_id = ?1",
                params![id, now],
            )?;
            ctx.record_event("call", id, EventType::RecordingRetried);
            Ok(())
        })
    }

    /// Manually re-queue a call whose metadata the server rejected.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound`, or `InvalidTransition` if the metadata is not `FAILED`.
    pub fn retry_metadata(&mut self, id: &str) -> Result<()> {
        let call = self.require_call(id)?;
        if call.metadata_sync_status != MetadataSyncStatus::Failed {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: call.metadata_sync_status.as_str().to_string(),
                to: MetadataSyncStatus::Pending.as_str().to_string(),
            });
        }
        self.mutate("retry_metadata", "user", |tx, ctx| {
            tx.execute(
                "UPDATE calls SET metadata_sync_status = 'PENDING', sync_error = NULL
                 WHERE composite_id = ?1",
                [id],
            )?;
            ctx.record_event("call", id, EventType::MetadataRetried);
            Ok(())
        })
    }

    /// Apply a local annotation edit.
    ///
    /// Bumps `updated_at` strictly past its previous value, which re-arms
    /// the metadata push.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound` if the call does not exist.
    pub fn annotate_call(&mut self, id: &str, edit: &CallAnnotation) -> Result<CallRecord> {
        let call = self.require_call(id)?;
        let updated_at = now_ms().max(call.updated_at + 1);

        self.mutate("annotate_call", "user", |tx, ctx| {
            tx.execute(
                "UPDATE calls SET note = COALESCE(?2, note),
                                  reviewed = COALESCE(?3, reviewed),
                                  label = COALESCE(?4, label),
                                  contact_name = COALESCE(?5, contact_name),
                                  metadata_sync_status = CASE
                                      WHEN metadata_sync_status = 'FAILED' THEN 'PENDING'
                                      ELSE metadata_sync_status END,
                                  updated_at = ?6
                 WHERE composite_id = ?1",
                params![id, edit.note, edit.reviewed, edit.label, edit.contact_name, updated_at],
            )?;
            ctx.record_event("call", id, EventType::CallAnnotated);
            Ok(())
        })?;

        self.require_call(id)
    }

    /// Merge a server-side call patch (last writer wins on `updated_at`).
    ///
    /// Only fields present in the patch are written. The merged row is
    /// stamped with the server's `updated_at` and counts as acknowledged at
    /// that version, so merging never triggers a push back.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn apply_call_patch(&mut self, update: &CallUpdate) -> Result<PatchOutcome> {
        self.mutate("apply_call_patch", "sync", |tx, ctx| {
            let local: Option<i64> = tx
                .query_row(
                    "SELECT updated_at FROM calls WHERE composite_id = ?1",
                    [&update.unique_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(local_updated_at) = local else {
                return Ok(PatchOutcome::Unknown);
            };
            if update.updated_at <= local_updated_at {
                return Ok(PatchOutcome::Stale);
            }

            tx.execute(
                "UPDATE calls SET reviewed = COALESCE(?2, reviewed),
                                  note = COALESCE(?3, note),
                                  contact_name = COALESCE(?4, contact_name),
                                  updated_at = ?5,
                                  acked_updated_at = CASE
                                      WHEN acked_updated_at IS NULL THEN NULL ELSE ?5 END
                 WHERE composite_id = ?1",
                params![
                    update.unique_id,
                    update.reviewed,
                    update.note,
                    update.caller_name,
                    update.updated_at
                ],
            )?;
            ctx.record_change(
                "call",
                &update.unique_id,
                EventType::CallMerged,
                Some(local_updated_at.to_string()),
                Some(update.updated_at.to_string()),
            );
            Ok(PatchOutcome::Applied)
        })
    }

    // ==================
    // Person Operations
    // ==================

    /// Get a person by phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_person(&self, phone: &str) -> Result<Option<PersonRecord>> {
        let person = self
            .conn
            .query_row(
                &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE phone_number = ?1"),
                [phone],
                map_person_row,
            )
            .optional()?;
        Ok(person)
    }

    /// Merge a server-side person patch (last writer wins on `updated_at`).
    ///
    /// Unknown numbers are created. A merged person is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn apply_person_patch(&mut self, update: &PersonUpdate) -> Result<PatchOutcome> {
        self.mutate("apply_person_patch", "sync", |tx, ctx| {
            let local: Option<i64> = tx
                .query_row(
                    "SELECT updated_at FROM persons WHERE phone_number = ?1",
                    [&update.phone],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(local_updated_at) = local {
                if update.updated_at <= local_updated_at {
                    return Ok(PatchOutcome::Stale);
                }
                tx.execute(
                    "UPDATE persons SET person_note = COALESCE(?2, person_note),
                                        label = COALESCE(?3, label),
                                        contact_name = COALESCE(?4, contact_name),
                                        sync_pending = 0,
                                        updated_at = ?5
                     WHERE phone_number = ?1",
                    params![
                        update.phone,
                        update.person_note,
                        update.label,
                        update.name,
                        update.updated_at
                    ],
                )?;
            } else {
                let last_call = latest_call_for(tx, &update.phone)?;
                tx.execute(
                    &format!(
                        "INSERT INTO persons ({PERSON_COLUMNS}) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)"
                    ),
                    params![
                        update.phone,
                        update.name,
                        update.person_note,
                        update.label,
                        last_call,
                        update.updated_at
                    ],
                )?;
            }

            ctx.record_change(
                "person",
                &update.phone,
                EventType::PersonMerged,
                local.map(|t| t.to_string()),
                Some(update.updated_at.to_string()),
            );
            Ok(PatchOutcome::Applied)
        })
    }

    /// Apply a local person edit and mark it pending for push.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn edit_person(&mut self, phone: &str, edit: &PersonEdit) -> Result<PersonRecord> {
        let existing = self.get_person(phone)?;
        let updated_at = existing
            .as_ref()
            .map_or_else(now_ms, |p| now_ms().max(p.updated_at + 1));

        self.mutate("edit_person", "user", |tx, ctx| {
            if existing.is_some() {
                tx.execute(
                    "UPDATE persons SET contact_name = COALESCE(?2, contact_name),
                                        person_note = COALESCE(?3, person_note),
                                        label = COALESCE(?4, label),
                                        sync_pending = 1,
                                        updated_at = ?5
                     WHERE phone_number = ?1",
                    params![phone, edit.contact_name, edit.person_note, edit.label, updated_at],
                )?;
            } else {
                let last_call = latest_call_for(tx, phone)?;
                tx.execute(
                    &format!(
                        "INSERT INTO persons ({PERSON_COLUMNS}) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)"
                    ),
                    params![
                        phone,
                        edit.contact_name,
                        edit.person_note,
                        edit.label,
                        last_call,
                        updated_at
                    ],
                )?;
            }
            ctx.record_event("person", phone, EventType::PersonEdited);
            Ok(())
        })?;

        self.get_person(phone)?.ok_or_else(|| Error::PersonNotFound {
            phone: phone.to_string(),
        })
    }

    /// Persons with local edits the server has not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn pending_persons(&self) -> Result<Vec<PersonRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PERSON_COLUMNS} FROM persons WHERE sync_pending = 1 ORDER BY updated_at ASC"
        ))?;
        let rows = stmt.query_map([], map_person_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Clear the pending flag after a successful push.
    ///
    /// Conditional on the row still carrying `pushed_updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn clear_person_pending(&mut self, phone: &str, pushed_updated_at: i64) -> Result<bool> {
        self.mutate("clear_person_pending", "sync", |tx, ctx| {
            let updated = tx.execute(
                "UPDATE persons SET sync_pending = 0 WHERE phone_number = ?1 AND updated_at = ?2",
                params![phone, pushed_updated_at],
            )?;
            if updated > 0 {
                ctx.record_event("person", phone, EventType::PersonSynced);
            }
            Ok(updated > 0)
        })
    }

    /// Copy a person's label onto their most recent call.
    ///
    /// Does not bump the call's `updated_at`. Returns the call that was
    /// labelled, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn propagate_label_to_latest_call(
        &mut self,
        phone: &str,
        label: Option<&str>,
    ) -> Result<Option<String>> {
        let pointer = self
            .get_person(phone)?
            .and_then(|p| p.last_call_composite_id);
        let target = match pointer {
            Some(id) => Some(id),
            None => latest_call_for(&self.conn, phone)?,
        };

        if let Some(id) = &target {
            self.conn.execute(
                "UPDATE calls SET label = ?2 WHERE composite_id = ?1",
                params![id, label],
            )?;
        }
        Ok(target)
    }

    // ==================
    // Exclusions
    // ==================

    /// Replace the exclusion list with `numbers` (normalized).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn replace_exclusions(&mut self, numbers: &[String]) -> Result<usize> {
        let now = now_ms();
        self.mutate("replace_exclusions", "sync", |tx, _ctx| {
            tx.execute("DELETE FROM excluded_contacts", [])?;
            let mut count = 0;
            for number in numbers {
                let normalized = normalize_phone(number);
                if normalized.is_empty() {
                    continue;
                }
                count += tx.execute(
                    "INSERT OR IGNORE INTO excluded_contacts (phone_number, added_at) VALUES (?1, ?2)",
                    params![normalized, now],
                )?;
            }
            Ok(count)
        })
    }

    /// Whether `phone` is on the exclusion list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn is_excluded(&self, phone: &str) -> Result<bool> {
        let found = self
            .conn
            .prepare("SELECT 1 FROM excluded_contacts WHERE phone_number = ?1")?
            .exists([normalize_phone(phone)])?;
        Ok(found)
    }

    /// All excluded numbers (normalized).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn excluded_numbers(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT phone_number FROM excluded_contacts")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(Error::from)
    }

    /// Settle every unfinished recording of an excluded number as `NOT_APPLICABLE`.
    ///
    /// Applies whatever the call's metadata status, so a number excluded
    /// after its call was synced never has audio sent. Returns the settled ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn settle_excluded_recordings(&mut self) -> Result<Vec<String>> {
        let now = now_ms();
        self.mutate("settle_excluded_recordings", "upload", |tx, ctx| {
            let excluded: HashSet<String> = tx
                .prepare("SELECT phone_number FROM excluded_contacts")?
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            if excluded.is_empty() {
                return Ok(Vec::new());
            }

            // Stored numbers keep their captured formatting.
            let candidates: Vec<(String, String, String)> = tx
                .prepare(
                    "SELECT composite_id, phone_number, recording_sync_status FROM calls
                     WHERE recording_sync_status IN ('PENDING', 'COMPRESSING', 'UPLOADING', 'FAILED')",
                )?
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<std::result::Result<_, _>>()?;

            let mut settled = Vec::new();
            for (id, phone, previous) in candidates {
                if !excluded.contains(&normalize_phone(&phone)) {
                    continue;
                }
                tx.execute(
                    "UPDATE calls SET recording_sync_status = 'NOT_APPLICABLE',
                                      recording_status_changed_at = ?2
                     WHERE composite_id = ?1",
                    params![id, now],
                )?;
                ctx.events.push(
                    Event::new("call", &id, EventType::RecordingNotApplicable, &ctx.actor)
                        .with_values(
                            Some(previous),
                            Some(RecordingSyncStatus::NotApplicable.as_str().to_string()),
                        )
                        .with_comment("number excluded"),
                );
                settled.push(id);
            }
            Ok(settled)
        })
    }

    // ==================
    // Sync State
    // ==================

    /// Server time of the last fully successful metadata pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_cursor(&self) -> Result<Option<i64>> {
        let value = self.read_state(KEY_LAST_SYNC_TIME)?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Advance the pull cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_cursor(&mut self, last_sync_time: i64) -> Result<()> {
        self.write_state(KEY_LAST_SYNC_TIME, &last_sync_time.to_string())
    }

    /// Device settings, or defaults when none were saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored JSON is corrupt.
    pub fn load_settings(&self) -> Result<LocalSettings> {
        match self.read_state(KEY_SETTINGS)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(LocalSettings::default()),
        }
    }

    /// Persist device settings.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_settings(&mut self, settings: &LocalSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.write_state(KEY_SETTINGS, &json)
    }

    fn read_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM sync_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write_state(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    // ==================
    // Reporting
    // ==================

    /// Status counts across all calls.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn sync_summary(&self) -> Result<SyncSummary> {
        let mut summary = SyncSummary {
            metadata: self.count_by("metadata_sync_status")?,
            recording: self.count_by("recording_sync_status")?,
            last_sync_time: self.load_cursor()?,
            ..SyncSummary::default()
        };
        summary.total_calls = summary.metadata.values().sum();
        summary.pending_persons = self.count("SELECT COUNT(*) FROM persons WHERE sync_pending = 1")?;
        summary.excluded_contacts = self.count("SELECT COUNT(*) FROM excluded_contacts")?;
        Ok(summary)
    }

    fn count_by(&self, column: &str) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {column}, COUNT(*) FROM calls GROUP BY {column}"))?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, usize::try_from(count).unwrap_or(0)))
        })?;
        rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(Error::from)
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Audit history of a call, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn call_events(&self, id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        Ok(get_events(&self.conn, "call", id, limit)?)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn read_recording_status(conn: &Connection, id: &str) -> Result<RecordingSyncStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT recording_sync_status FROM calls WHERE composite_id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    status
        .map(|s| RecordingSyncStatus::from_str(&s))
        .ok_or_else(|| Error::CallNotFound { id: id.to_string() })
}

fn latest_call_for(conn: &Connection, phone: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT composite_id FROM calls WHERE phone_number = ?1
             ORDER BY call_timestamp DESC LIMIT 1",
            [phone],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

const fn recording_event(status: RecordingSyncStatus) -> EventType {
    match status {
        RecordingSyncStatus::Uploading | RecordingSyncStatus::Compressing => {
            EventType::RecordingUploading
        }
        RecordingSyncStatus::Completed => EventType::RecordingCompleted,
        RecordingSyncStatus::Failed => EventType::RecordingFailed,
        RecordingSyncStatus::NotApplicable => EventType::RecordingNotApplicable,
        RecordingSyncStatus::Pending => EventType::RecordingReset,
    }
}

fn map_call_row(row: &rusqlite::Row) -> rusqlite::Result<CallRecord> {
    let call_type: String = row.get(3)?;
    let metadata: String = row.get(10)?;
    let recording: String = row.get(11)?;
    Ok(CallRecord {
        composite_id: row.get(0)?,
        phone_number: row.get(1)?,
        contact_name: row.get(2)?,
        call_type: CallType::from_str(&call_type),
        duration: row.get(4)?,
        call_timestamp: row.get(5)?,
        device_phone: row.get(6)?,
        note: row.get(7)?,
        reviewed: row.get(8)?,
        label: row.get(9)?,
        metadata_sync_status: MetadataSyncStatus::from_str(&metadata),
        recording_sync_status: RecordingSyncStatus::from_str(&recording),
        local_recording_path: row.get(12)?,
        sync_error: row.get(13)?,
        synced_at: row.get(14)?,
        acked_updated_at: row.get(15)?,
        recording_status_changed_at: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn map_person_row(row: &rusqlite::Row) -> rusqlite::Result<PersonRecord> {
    Ok(PersonRecord {
        phone_number: row.get(0)?,
        contact_name: row.get(1)?,
        person_note: row.get(2)?,
        label: row.get(3)?,
        sync_pending: row.get(4)?,
        last_call_composite_id: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
