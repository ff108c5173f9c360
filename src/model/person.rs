//! Person record model.
//!
//! Per-contact annotations keyed by phone number.

use serde::{Deserialize, Serialize};

/// Annotations attached to a phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
    /// Key.
    pub phone_number: String,

    pub contact_name: Option<String>,

    pub person_note: Option<String>,

    pub label: Option<String>,

    /// Local edit not yet acknowledged by the server.
    pub sync_pending: bool,

    /// Most recent call with this number, used for label propagation.
    pub last_call_composite_id: Option<String>,

    /// Last modification (Unix milliseconds).
    pub updated_at: i64,
}

impl PersonRecord {
    /// Create an empty person record for a number.
    pub fn new(phone_number: String) -> Self {
        Self {
            phone_number,
            contact_name: None,
            person_note: None,
            label: None,
            sync_pending: false,
            last_call_composite_id: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
