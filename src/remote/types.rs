//! Wire types for the remote sync service.
//!
//! Timestamps on the wire are Unix milliseconds.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{CallType, PlanInfo};

/// A server-pushed setting value and whether devices may override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerValue<T> {
    pub value: T,
    #[serde(default)]
    pub locked: bool,
}

impl<T> ServerValue<T> {
    pub fn unlocked(value: T) -> Self {
        Self {
            value,
            locked: false,
        }
    }

    pub fn locked(value: T) -> Self {
        Self {
            value,
            locked: true,
        }
    }
}

/// Organization settings pushed with the config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub flags: BTreeMap<String, ServerValue<bool>>,
    #[serde(default)]
    pub dates: BTreeMap<String, ServerValue<NaiveDate>>,
}

/// Response of `fetch_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigResponse {
    #[serde(default)]
    pub settings: ServerSettings,
    #[serde(default)]
    pub plan: PlanInfo,
    #[serde(default)]
    pub excluded_contacts: Vec<String>,
}

/// Partial patch for one call. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallUpdate {
    pub unique_id: String,
    #[serde(default)]
    pub reviewed: Option<bool>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub caller_name: Option<String>,
    pub updated_at: i64,
}

/// Partial patch for one person. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonUpdate {
    pub phone: String,
    #[serde(default)]
    pub person_note: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub updated_at: i64,
}

/// Response of `fetch_updates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatesResponse {
    #[serde(default)]
    pub call_updates: Vec<CallUpdate>,
    #[serde(default)]
    pub person_updates: Vec<PersonUpdate>,
}

/// One call in a `batch_sync_calls` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCall {
    pub unique_id: String,
    pub caller_name: Option<String>,
    pub caller: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub duration: i64,
    pub call_time: i64,
    pub device_phone: Option<String>,
}

/// Body of `batch_sync_calls`.
#[derive(Debug, Serialize)]
pub(crate) struct BatchSyncRequest<'a> {
    pub org_id: &'a str,
    pub user_id: &'a str,
    pub device_id: &'a str,
    pub calls: &'a [BatchCall],
}

/// Response of `batch_sync_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    #[serde(default)]
    pub synced_ids: Vec<String>,
    pub server_time: i64,
}

/// Body of `update_call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCallRequest {
    pub unique_id: String,
    pub reviewed: bool,
    pub note: Option<String>,
    pub caller_name: Option<String>,
    pub updated_at: i64,
}

/// Response of `update_call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCallResponse {
    pub server_time: i64,
}

/// Body of `update_person`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePersonRequest {
    pub phone: String,
    pub org_id: String,
    pub person_note: Option<String>,
    pub label: Option<String>,
    pub name: Option<String>,
    pub updated_at: i64,
}

/// `{ "success": bool }` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecordingStatusRequest<'a> {
    pub ids: &'a [String],
}

/// Response of `check_recordings_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStatusResponse {
    #[serde(default)]
    pub completed_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FinalizeRequest<'a> {
    pub unique_id: &'a str,
    pub total_chunks: u32,
}

/// Outcome of a single chunk POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAck {
    /// Chunk appended.
    Accepted,
    /// The server already holds the complete recording.
    AlreadyCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_response_parses_locked_values() {
        let json = r#"{
            "settings": {
                "flags": {"recording_upload": {"value": true, "locked": true}},
                "dates": {"track_start_date": {"value": "2026-01-15"}}
            },
            "plan": {"expiry_date": "2026-12-31", "allowed_storage_gb": 5.0, "storage_used_bytes": 1024},
            "excluded_contacts": ["+15550100"]
        }"#;
        let config: ConfigResponse = serde_json::from_str(json).unwrap();
        assert!(config.settings.flags["recording_upload"].locked);
        assert!(!config.settings.dates["track_start_date"].locked);
        assert_eq!(config.plan.storage_used_bytes, 1024);
        assert_eq!(config.excluded_contacts.len(), 1);
    }

    #[test]
    fn test_call_update_absent_fields_are_none() {
        let update: CallUpdate =
            serde_json::from_str(r#"{"unique_id":"c1","note":"hi","updated_at":5}"#).unwrap();
        assert_eq!(update.note.as_deref(), Some("hi"));
        assert!(update.reviewed.is_none());
        assert!(update.caller_name.is_none());
    }

    #[test]
    fn test_batch_call_serializes_type_field() {
        let call = BatchCall {
            unique_id: "c1".into(),
            caller_name: None,
            caller: "555".into(),
            call_type: CallType::Outgoing,
            duration: 3,
            call_time: 10,
            device_phone: None,
        };
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["type"], "outgoing");
    }
}
