//! Call record model.
//!
//! A call record is one entry of the device call log plus the annotations
//! and sync bookkeeping the engines maintain for it.

use serde::{Deserialize, Serialize};

/// Direction / outcome of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Rejected,
    Blocked,
}

impl CallType {
    /// Get the string representation for storage and the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
            Self::Blocked => "blocked",
        }
    }

    /// Parse from string. Unknown values fall back to `Incoming`.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "outgoing" => Self::Outgoing,
            "missed" => Self::Missed,
            "rejected" => Self::Rejected,
            "blocked" => Self::Blocked,
            _ => Self::Incoming,
        }
    }
}

/// Metadata sync state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetadataSyncStatus {
    Pending,
    Synced,
    Failed,
}

impl MetadataSyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Synced => "SYNCED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s {
            "SYNCED" => Self::Synced,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Recording upload state of a call.
///
/// Transitions only move forward, with two exceptions: a manual retry
/// (`Failed -> Pending`) and a cancellation rollback (`Uploading -> Pending`).
/// `NotApplicable` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingSyncStatus {
    NotApplicable,
    Pending,
    Compressing,
    Uploading,
    Completed,
    Failed,
}

impl RecordingSyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotApplicable => "NOT_APPLICABLE",
            Self::Pending => "PENDING",
            Self::Compressing => "COMPRESSING",
            Self::Uploading => "UPLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s {
            "NOT_APPLICABLE" => Self::NotApplicable,
            "COMPRESSING" => Self::Compressing,
            "UPLOADING" => Self::Uploading,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Position in the forward lifecycle.
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Compressing => 1,
            Self::Uploading => 2,
            Self::Completed | Self::Failed => 3,
            Self::NotApplicable => 4,
        }
    }

    /// In-flight states that a crash can leave behind.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Compressing | Self::Uploading)
    }

    /// Whether moving from `self` to `next` is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::NotApplicable, _) => false,
            (Self::Failed, Self::Pending) => true,
            (Self::Uploading | Self::Compressing, Self::Pending) => true,
            (Self::Completed, _) => false,
            (from, to) => to.rank() > from.rank(),
        }
    }
}

/// A call log entry with annotations and sync state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Stable identity derived from device + timestamp + number.
    pub composite_id: String,

    pub phone_number: String,

    pub contact_name: Option<String>,

    pub call_type: CallType,

    /// Duration in seconds.
    pub duration: i64,

    /// Call start (Unix milliseconds).
    pub call_timestamp: i64,

    /// Line of this device that placed/received the call, if resolved.
    pub device_phone: Option<String>,

    pub note: Option<String>,

    pub reviewed: bool,

    pub label: Option<String>,

    pub metadata_sync_status: MetadataSyncStatus,

    pub recording_sync_status: RecordingSyncStatus,

    pub local_recording_path: Option<String>,

    /// Last captured server rejection or transfer failure.
    pub sync_error: Option<String>,

    /// Server time of the last acknowledgement (Unix milliseconds).
    pub synced_at: Option<i64>,

    /// Local `updated_at` value the server last acknowledged.
    pub acked_updated_at: Option<i64>,

    /// When `recording_sync_status` last changed (Unix milliseconds).
    pub recording_status_changed_at: i64,

    pub created_at: i64,

    /// Last local or merged modification (Unix milliseconds).
    pub updated_at: i64,
}

impl CallRecord {
    /// Create a freshly imported record.
    ///
    /// Zero-duration calls never carry audio, so they start `NotApplicable`.
    pub fn new(
        composite_id: String,
        phone_number: String,
        call_type: CallType,
        duration: i64,
        call_timestamp: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let recording_sync_status = if duration > 0 {
            RecordingSyncStatus::Pending
        } else {
            RecordingSyncStatus::NotApplicable
        };

        Self {
            composite_id,
            phone_number,
            contact_name: None,
            call_type,
            duration,
            call_timestamp,
            device_phone: None,
            note: None,
            reviewed: false,
            label: None,
            metadata_sync_status: MetadataSyncStatus::Pending,
            recording_sync_status,
            local_recording_path: None,
            sync_error: None,
            synced_at: None,
            acked_updated_at: None,
            recording_status_changed_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_contact_name(mut self, name: &str) -> Self {
        self.contact_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_device_phone(mut self, phone: &str) -> Self {
        self.device_phone = Some(phone.to_string());
        self
    }

    /// Never acknowledged by the server.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.acked_updated_at.is_none()
    }

    /// Acknowledged once, then modified locally.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        match self.acked_updated_at {
            Some(acked) => {
                self.updated_at > acked || self.metadata_sync_status != MetadataSyncStatus::Synced
            }
            None => false,
        }
    }
}

/// Keep only the digits of a phone number (and a leading `+`).
///
/// Exclusion matching and recording lookup compare normalized numbers.
#[must_use]
pub fn normalize_phone(number: &str) -> String {
    let trimmed = number.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_call_zero_duration_not_applicable() {
        let call = CallRecord::new("c1".into(), "555".into(), CallType::Missed, 0, 1_000);
        assert_eq!(call.recording_sync_status, RecordingSyncStatus::NotApplicable);
        assert_eq!(call.metadata_sync_status, MetadataSyncStatus::Pending);
        assert!(call.is_new());
        assert!(!call.is_changed());
    }

    #[test]
    fn test_new_call_with_duration_pending() {
        let call = CallRecord::new("c1".into(), "555".into(), CallType::Incoming, 42, 1_000);
        assert_eq!(call.recording_sync_status, RecordingSyncStatus::Pending);
    }

    #[test]
    fn test_changed_after_ack() {
        let mut call = CallRecord::new("c1".into(), "555".into(), CallType::Incoming, 1, 1_000);
        call.metadata_sync_status = MetadataSyncStatus::Synced;
        call.acked_updated_at = Some(call.updated_at);
        assert!(!call.is_changed());

        call.updated_at += 1;
        assert!(call.is_changed());
    }

    #[test]
    fn test_recording_transitions() {
        use RecordingSyncStatus::*;
        assert!(Pending.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Completed));
        assert!(Uploading.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Pending.can_transition_to(NotApplicable));
        assert!(!NotApplicable.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(CallType::from_str("Outgoing"), CallType::Outgoing);
        assert_eq!(MetadataSyncStatus::from_str("SYNCED"), MetadataSyncStatus::Synced);
        assert_eq!(
            RecordingSyncStatus::from_str("NOT_APPLICABLE"),
            RecordingSyncStatus::NotApplicable
        );
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-2000"), "+15550102000");
        assert_eq!(normalize_phone(" 555-0100 "), "5550100");
    }
}
