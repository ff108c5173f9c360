//! Audit event storage and retrieval.
//!
//! Events record every sync status transition so a record's history can
//! be reconstructed when debugging a stuck or failed sync.

use rusqlite::{Connection, Result};

/// Event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    // Call events
    CallImported,
    CallAnnotated,
    CallMerged,

    // Metadata sync events
    MetadataSynced,
    MetadataFailed,
    MetadataExcluded,
    MetadataRetried,

    // Recording events
    RecordingUploading,
    RecordingCompleted,
    RecordingFailed,
    RecordingNotApplicable,
    RecordingReset,
    RecordingRetried,

    // Person events
    PersonEdited,
    PersonMerged,
    PersonSynced,
}

impl EventType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CallImported => "call_imported",
            Self::CallAnnotated => "call_annotated",
            Self::CallMerged => "call_merged",
            Self::MetadataSynced => "metadata_synced",
            Self::MetadataFailed => "metadata_failed",
            Self::MetadataExcluded => "metadata_excluded",
            Self::MetadataRetried => "metadata_retried",
            Self::RecordingUploading => "recording_uploading",
            Self::RecordingCompleted => "recording_completed",
            Self::RecordingFailed => "recording_failed",
            Self::RecordingNotApplicable => "recording_not_applicable",
            Self::RecordingReset => "recording_reset",
            Self::RecordingRetried => "recording_retried",
            Self::PersonEdited => "person_edited",
            Self::PersonMerged => "person_merged",
            Self::PersonSynced => "person_synced",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let event = match s {
            "call_imported" => Self::CallImported,
            "call_annotated" => Self::CallAnnotated,
            "call_merged" => Self::CallMerged,
            "metadata_synced" => Self::MetadataSynced,
            "metadata_failed" => Self::MetadataFailed,
            "metadata_excluded" => Self::MetadataExcluded,
            "metadata_retried" => Self::MetadataRetried,
            "recording_uploading" => Self::RecordingUploading,
            "recording_completed" => Self::RecordingCompleted,
            "recording_failed" => Self::RecordingFailed,
            "recording_not_applicable" => Self::RecordingNotApplicable,
            "recording_reset" => Self::RecordingReset,
            "recording_retried" => Self::RecordingRetried,
            "person_edited" => Self::PersonEdited,
            "person_merged" => Self::PersonMerged,
            "person_synced" => Self::PersonSynced,
            _ => return None,
        };
        Some(event)
    }
}

/// An audit event record.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
}

impl Event {
    /// Create a new event (id will be assigned by database).
    #[must_use]
    pub fn new(entity_type: &str, entity_id: &str, event_type: EventType, actor: &str) -> Self {
        Self {
            id: 0,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            event_type,
            actor: actor.to_string(),
            old_value: None,
            new_value: None,
            comment: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Add old/new values for field change tracking.
    #[must_use]
    pub fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    /// Add a comment to the event.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (entity_type, entity_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            event.entity_type,
            event.entity_id,
            event.event_type.as_str(),
            event.actor,
            event.old_value,
            event.new_value,
            event.comment,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get events for an entity, newest first.
///
/// Rows with an event type this build does not know are skipped.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_events(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    limit: Option<u32>,
) -> Result<Vec<Event>> {
    let limit = limit.unwrap_or(100);
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY created_at DESC, id DESC
         LIMIT ?3",
    )?;

    let rows = stmt.query_map(rusqlite::params![entity_type, entity_id, limit], |row| {
        let kind: String = row.get(3)?;
        Ok(EventType::parse(&kind).map(|event_type| Event {
            id: row.get(0).unwrap_or_default(),
            entity_type: row.get(1).unwrap_or_default(),
            entity_id: row.get(2).unwrap_or_default(),
            event_type,
            actor: row.get(4).unwrap_or_default(),
            old_value: row.get(5).ok().flatten(),
            new_value: row.get(6).ok().flatten(),
            comment: row.get(7).ok().flatten(),
            created_at: row.get(8).unwrap_or_default(),
        }))
    })?;

    let mut events = Vec::new();
    for row in rows {
        if let Some(event) = row? {
            events.push(event);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;

    #[test]
    fn test_event_insert_and_get() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let event = Event::new("call", "c_123", EventType::RecordingFailed, "upload")
            .with_values(Some("UPLOADING".into()), Some("FAILED".into()))
            .with_comment("chunk 3 rejected");

        let id = insert_event(&conn, &event).unwrap();
        assert!(id > 0);

        let events = get_events(&conn, "call", "c_123", Some(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RecordingFailed);
        assert_eq!(events[0].actor, "upload");
        assert_eq!(events[0].new_value.as_deref(), Some("FAILED"));
        assert_eq!(events[0].comment, Some("chunk 3 rejected".to_string()));
    }

    #[test]
    fn test_event_type_roundtrip() {
        for kind in [
            EventType::CallImported,
            EventType::MetadataExcluded,
            EventType::RecordingReset,
            EventType::PersonSynced,
        ] {
            assert_eq!(EventType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventType::parse("session_created"), None);
    }
}
