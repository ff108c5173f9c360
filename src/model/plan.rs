//! Subscription plan and storage quota.
//!
//! The server pushes the plan with every config fetch. The recording
//! upload engine refuses to run when the plan is expired or the storage
//! quota is used up.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Snapshot of the organization's plan and storage usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanInfo {
    /// Last day the plan is valid. `None` means no expiry.
    pub expiry_date: Option<NaiveDate>,

    /// Storage allowance in gigabytes.
    pub allowed_storage_gb: f64,

    /// Storage consumed so far in bytes.
    pub storage_used_bytes: u64,
}

impl PlanInfo {
    /// Whether the plan expired before `today`.
    #[must_use]
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < today)
    }

    /// Allowance in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn allowed_storage_bytes(&self) -> u64 {
        (self.allowed_storage_gb.max(0.0) * BYTES_PER_GB) as u64
    }

    /// Used / allowed storage. A zero allowance counts as full.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn storage_ratio(&self) -> f64 {
        let allowed = self.allowed_storage_bytes();
        if allowed == 0 {
            return f64::INFINITY;
        }
        self.storage_used_bytes as f64 / allowed as f64
    }

    /// Whether another upload fits.
    #[must_use]
    pub fn has_storage_left(&self) -> bool {
        self.storage_ratio() < 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_plan_expiry() {
        let plan = PlanInfo {
            expiry_date: Some(date("2026-03-01")),
            ..Default::default()
        };
        assert!(!plan.is_expired(date("2026-03-01")));
        assert!(plan.is_expired(date("2026-03-02")));
        assert!(!PlanInfo::default().is_expired(date("2099-01-01")));
    }

    #[test]
    fn test_storage_ratio() {
        let plan = PlanInfo {
            expiry_date: None,
            allowed_storage_gb: 1.0,
            storage_used_bytes: 512 * 1024 * 1024,
        };
        assert!((plan.storage_ratio() - 0.5).abs() < f64::EPSILON);
        assert!(plan.has_storage_left());

        let full = PlanInfo {
            storage_used_bytes: 1024 * 1024 * 1024,
            ..plan
        };
        assert!(!full.has_storage_left());
    }

    #[test]
    fn test_zero_allowance_is_full() {
        assert!(!PlanInfo::default().has_storage_left());
    }
}
