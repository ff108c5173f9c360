//! Upload preconditions.
//!
//! All four must hold for a pass to touch anything: pairing, the
//! organization's recording flag, an unexpired plan, storage left.

use chrono::NaiveDate;

use crate::config::{LocalSettings, Pairing};
use crate::error::{Error, Result};

/// Check the gate against the persisted settings.
///
/// # Errors
///
/// Returns `NotPaired`, `PermissionMissing`, `PlanExpired` or `QuotaExceeded`.
pub fn check_gate(settings: &LocalSettings, today: NaiveDate) -> Result<Pairing> {
    let pairing = settings.pairing.clone().ok_or(Error::NotPaired)?;

    if !settings.recording_enabled() {
        return Err(Error::PermissionMissing(
            "recording upload disabled for organization".to_string(),
        ));
    }

    let plan = &settings.plan;
    if plan.is_expired(today) {
        let expiry = plan
            .expiry_date
            .map(|d| d.to_string())
            .unwrap_or_default();
        return Err(Error::PlanExpired { expiry });
    }
    if !plan.has_storage_left() {
        return Err(Error::QuotaExceeded {
            used_bytes: plan.storage_used_bytes,
            allowed_bytes: plan.allowed_storage_bytes(),
        });
    }

    Ok(pairing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FLAG_RECORDING_UPLOAD;
    use crate::model::PlanInfo;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn open_settings() -> LocalSettings {
        let mut settings = LocalSettings {
            pairing: Some(Pairing {
                org_id: "org".into(),
                user_id: "user".into(),
                device_id: "dev".into(),
            }),
            plan: PlanInfo {
                expiry_date: None,
                allowed_storage_gb: 1.0,
                storage_used_bytes: 0,
            },
            ..LocalSettings::default()
        };
        settings.flags.insert(FLAG_RECORDING_UPLOAD.into(), true);
        settings
    }

    #[test]
    fn test_gate_open() {
        assert_eq!(check_gate(&open_settings(), today()).unwrap().org_id, "org");
    }

    #[test]
    fn test_gate_failures() {
        let mut unpaired = open_settings();
        unpaired.pairing = None;
        assert!(matches!(check_gate(&unpaired, today()), Err(Error::NotPaired)));

        let mut disabled = open_settings();
        disabled.flags.insert(FLAG_RECORDING_UPLOAD.into(), false);
        assert!(matches!(
            check_gate(&disabled, today()),
            Err(Error::PermissionMissing(_))
        ));

        let mut expired = open_settings();
        expired.plan.expiry_date = NaiveDate::from_ymd_opt(2026, 5, 31);
        assert!(matches!(
            check_gate(&expired, today()),
            Err(Error::PlanExpired { .. })
        ));

        let mut full = open_settings();
        full.plan.storage_used_bytes = full.plan.allowed_storage_bytes();
        assert!(matches!(
            check_gate(&full, today()),
            Err(Error::QuotaExceeded { .. })
        ));
    }
}
