//! Local device settings.
//!
//! Holds the pairing identity, the device descriptor sent with config
//! fetches, and the server-pushed flags/dates after the applier merged
//! them. Persisted as a single JSON row in the store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::PlanInfo;

/// Server-side kill switch for metadata sync. Absent means enabled.
pub const FLAG_SYNC_ENABLED: &str = "sync_enabled";

/// Organization opted into recording uploads. Absent means disabled.
pub const FLAG_RECORDING_UPLOAD: &str = "recording_upload";

/// Calls before this date are not captured.
pub const DATE_TRACK_START: &str = "track_start_date";

/// Org/user identity the device is paired with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub org_id: String,
    pub user_id: String,
    pub device_id: String,
}

/// Device descriptor reported with every config fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub os_version: String,
    pub device_model: String,
    pub battery_pct: Option<u8>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            os_version: std::env::consts::OS.to_string(),
            device_model: std::env::consts::ARCH.to_string(),
            battery_pct: None,
        }
    }
}

/// Settings persisted on the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSettings {
    pub pairing: Option<Pairing>,

    /// Composite ids are derived from this, so it outlives any pairing.
    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub device: DeviceInfo,

    /// Effective flag values.
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,

    /// Effective date values.
    #[serde(default)]
    pub dates: BTreeMap<String, NaiveDate>,

    /// Keys the server marked non-overridable.
    #[serde(default)]
    pub locked: BTreeSet<String>,

    /// Last flag values the server pushed, for change detection.
    #[serde(default)]
    pub server_flags: BTreeMap<String, bool>,

    /// Last date values the server pushed, for change detection.
    #[serde(default)]
    pub server_dates: BTreeMap<String, NaiveDate>,

    #[serde(default)]
    pub plan: PlanInfo,
}

impl LocalSettings {
    /// Metadata sync was switched off remotely.
    #[must_use]
    pub fn remote_disabled(&self) -> bool {
        !self.flags.get(FLAG_SYNC_ENABLED).copied().unwrap_or(true)
    }

    /// Recording uploads are enabled for the organization.
    #[must_use]
    pub fn recording_enabled(&self) -> bool {
        self.flags.get(FLAG_RECORDING_UPLOAD).copied().unwrap_or(false)
    }

    /// This device's id, generated on first use.
    pub fn ensure_device_id(&mut self) -> String {
        self.device_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }

    #[must_use]
    pub fn track_start_date(&self) -> Option<NaiveDate> {
        self.dates.get(DATE_TRACK_START).copied()
    }

    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.locked.contains(key)
    }

    /// Change a flag from the device side.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the server locked the key.
    pub fn set_flag(&mut self, key: &str, value: bool) -> Result<()> {
        if self.is_locked(key) {
            return Err(Error::InvalidArgument(format!(
                "setting '{key}' is locked by the organization"
            )));
        }
        self.flags.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LocalSettings::default();
        assert!(settings.pairing.is_none());
        assert!(!settings.remote_disabled());
        assert!(!settings.recording_enabled());
        assert!(settings.track_start_date().is_none());
    }

    #[test]
    fn test_locked_flag_rejects_local_edit() {
        let mut settings = LocalSettings::default();
        settings.locked.insert(FLAG_RECORDING_UPLOAD.to_string());
        assert!(settings.set_flag(FLAG_RECORDING_UPLOAD, true).is_err());
        assert!(settings.set_flag(FLAG_SYNC_ENABLED, false).is_ok());
        assert!(settings.remote_disabled());
    }

    #[test]
    fn test_json_roundtrip_with_missing_fields() {
        let settings: LocalSettings = serde_json::from_str(r#"{"pairing":null}"#).unwrap();
        assert_eq!(settings, LocalSettings::default());
    }
}
