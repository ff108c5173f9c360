//! Database schema definitions.
//!
//! Timestamps are stored as INTEGER (Unix milliseconds).

use rusqlite::{Connection, Result};

/// Current schema version, recorded in `schema_migrations`.
///
/// Bump it together with an upgrade step in [`apply_schema`] once a
/// released layout changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the callsync database.
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Core Tables
-- ====================

-- Calls: one row per call log entry, keyed by composite id
CREATE TABLE IF NOT EXISTS calls (
    composite_id TEXT PRIMARY KEY,
    phone_number TEXT NOT NULL,
    contact_name TEXT,
    call_type TEXT NOT NULL CHECK (call_type IN ('incoming', 'outgoing', 'missed', 'rejected', 'blocked')),
    duration INTEGER NOT NULL DEFAULT 0 CHECK (duration >= 0),
    call_timestamp INTEGER NOT NULL,
    device_phone TEXT,
    note TEXT,
    reviewed INTEGER NOT NULL DEFAULT 0,
    label TEXT,
    metadata_sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (metadata_sync_status IN ('PENDING', 'SYNCED', 'FAILED')),
    recording_sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (recording_sync_status IN ('NOT_APPLICABLE', 'PENDING', 'COMPRESSING', 'UPLOADING', 'COMPLETED', 'FAILED')),
    local_recording_path TEXT,
    sync_error TEXT,
    synced_at INTEGER,
    acked_updated_at INTEGER,
    recording_status_changed_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calls_phone ON calls(phone_number);
CREATE INDEX IF NOT EXISTS idx_calls_phone_time ON calls(phone_number, call_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_calls_timestamp ON calls(call_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_calls_metadata_status ON calls(metadata_sync_status);
CREATE INDEX IF NOT EXISTS idx_calls_recording_status ON calls(recording_sync_status, call_timestamp);

-- Persons: annotations keyed by phone number
CREATE TABLE IF NOT EXISTS persons (
    phone_number TEXT PRIMARY KEY,
    contact_name TEXT,
    person_note TEXT,
    label TEXT,
    sync_pending INTEGER NOT NULL DEFAULT 0,
    last_call_composite_id TEXT,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_persons_pending ON persons(sync_pending);

-- Excluded contacts: normalized numbers that must never leave the device
CREATE TABLE IF NOT EXISTS excluded_contacts (
    phone_number TEXT PRIMARY KEY,
    added_at INTEGER NOT NULL
);

-- Sync state: cursor and settings as key/value rows
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
"#;

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS` and the version row
/// is only inserted once.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
