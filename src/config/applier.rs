//! Config/quota applier.
//!
//! Merges server-pushed settings into [`LocalSettings`]:
//!
//! - **Locked** keys: the server value wins over any local edit. The key
//!   is only rewritten when the value actually differs, so consumers that
//!   react to changes are not re-triggered.
//! - **Unlocked** keys: the server value is applied only when it differs
//!   from the last value the server pushed. A device-side override
//!   survives until the server changes its own value.
//!
//! The plan snapshot is always replaced.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::remote::{ConfigResponse, ServerValue};

use super::settings::{LocalSettings, FLAG_SYNC_ENABLED};

/// What an apply changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedConfig {
    /// Flag keys whose effective value changed.
    pub changed_flags: Vec<String>,
    /// Date keys whose effective value changed.
    pub changed_dates: Vec<String>,
    pub plan_changed: bool,
    /// Metadata sync went from disabled to enabled.
    pub sync_reenabled: bool,
}

impl AppliedConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed_flags.is_empty() && self.changed_dates.is_empty() && !self.plan_changed
    }
}

/// Applies server configuration with lock semantics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigApplier;

impl ConfigApplier {
    /// Merge `config` into `settings`.
    #[must_use]
    pub fn apply(settings: &mut LocalSettings, config: &ConfigResponse) -> AppliedConfig {
        let was_disabled = settings.remote_disabled();
        let mut applied = AppliedConfig::default();

        for (key, server) in &config.settings.flags {
            if merge_value(
                key,
                server,
                &mut settings.flags,
                &mut settings.server_flags,
                &mut settings.locked,
            ) {
                applied.changed_flags.push(key.clone());
            }
        }

        for (key, server) in &config.settings.dates {
            if merge_value(
                key,
                server,
                &mut settings.dates,
                &mut settings.server_dates,
                &mut settings.locked,
            ) {
                applied.changed_dates.push(key.clone());
            }
        }

        if settings.plan != config.plan {
            settings.plan = config.plan.clone();
            applied.plan_changed = true;
        }

        applied.sync_reenabled = was_disabled && !settings.remote_disabled();
        if applied.sync_reenabled {
            debug!(flag = FLAG_SYNC_ENABLED, "Remote sync re-enabled by server");
        }

        applied
    }
}

/// Merge one server value. Returns true if the effective value changed.
fn merge_value<T: Clone + PartialEq>(
    key: &str,
    server: &ServerValue<T>,
    local: &mut BTreeMap<String, T>,
    last_seen: &mut BTreeMap<String, T>,
    locked: &mut BTreeSet<String>,
) -> bool {
    let differs_locally = local.get(key) != Some(&server.value);
    let differs_from_seen = last_seen.get(key) != Some(&server.value);

    let apply = if server.locked {
        locked.insert(key.to_string());
        differs_locally
    } else {
        locked.remove(key);
        differs_from_seen && differs_locally
    };

    last_seen.insert(key.to_string(), server.value.clone());

    if apply {
        local.insert(key.to_string(), server.value.clone());
    }
    apply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{DATE_TRACK_START, FLAG_RECORDING_UPLOAD};
    use crate::model::PlanInfo;
    use chrono::NaiveDate;

    fn config_with_flag(key: &str, value: ServerValue<bool>) -> ConfigResponse {
        let mut config = ConfigResponse::default();
        config.settings.flags.insert(key.to_string(), value);
        config
    }

    #[test]
    fn test_locked_flag_overrides_local_edit() {
        let mut settings = LocalSettings::default();
        settings.flags.insert(FLAG_RECORDING_UPLOAD.into(), false);
        settings.server_flags.insert(FLAG_RECORDING_UPLOAD.into(), true);

        let config = config_with_flag(FLAG_RECORDING_UPLOAD, ServerValue::locked(true));
        let applied = ConfigApplier::apply(&mut settings, &config);

        assert!(settings.recording_enabled());
        assert!(settings.is_locked(FLAG_RECORDING_UPLOAD));
        assert_eq!(applied.changed_flags, vec![FLAG_RECORDING_UPLOAD.to_string()]);
    }

    #[test]
    fn test_unlocked_flag_keeps_local_override_until_server_changes() {
        let mut settings = LocalSettings::default();
        let config = config_with_flag(FLAG_RECORDING_UPLOAD, ServerValue::unlocked(true));
        ConfigApplier::apply(&mut settings, &config);
        assert!(settings.recording_enabled());

        // Device turns it off; the same server value does not re-enable it.
        settings.set_flag(FLAG_RECORDING_UPLOAD, false).unwrap();
        let applied = ConfigApplier::apply(&mut settings, &config);
        assert!(!settings.recording_enabled());
        assert!(applied.is_empty());

        // Server flips its value: that propagates.
        let off = config_with_flag(FLAG_RECORDING_UPLOAD, ServerValue::unlocked(false));
        ConfigApplier::apply(&mut settings, &off);
        let on = config_with_flag(FLAG_RECORDING_UPLOAD, ServerValue::unlocked(true));
        let applied = ConfigApplier::apply(&mut settings, &on);
        assert!(settings.recording_enabled());
        assert_eq!(applied.changed_flags.len(), 1);
    }

    #[test]
    fn test_locked_date_only_rewritten_when_different() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let mut config = ConfigResponse::default();
        config
            .settings
            .dates
            .insert(DATE_TRACK_START.into(), ServerValue::locked(date));

        let mut settings = LocalSettings::default();
        let first = ConfigApplier::apply(&mut settings, &config);
        assert_eq!(first.changed_dates, vec![DATE_TRACK_START.to_string()]);

        let second = ConfigApplier::apply(&mut settings, &config);
        assert!(second.changed_dates.is_empty());
        assert_eq!(settings.track_start_date(), Some(date));
    }

    #[test]
    fn test_unlock_releases_key() {
        let mut settings = LocalSettings::default();
        ConfigApplier::apply(
            &mut settings,
            &config_with_flag(FLAG_RECORDING_UPLOAD, ServerValue::locked(true)),
        );
        assert!(settings.is_locked(FLAG_RECORDING_UPLOAD));

        ConfigApplier::apply(
            &mut settings,
            &config_with_flag(FLAG_RECORDING_UPLOAD, ServerValue::unlocked(true)),
        );
        assert!(!settings.is_locked(FLAG_RECORDING_UPLOAD));
    }

    #[test]
    fn test_sync_reenabled_detected() {
        let mut settings = LocalSettings::default();
        settings.flags.insert(FLAG_SYNC_ENABLED.into(), false);

        let config = config_with_flag(FLAG_SYNC_ENABLED, ServerValue::locked(true));
        let applied = ConfigApplier::apply(&mut settings, &config);
        assert!(applied.sync_reenabled);
        assert!(!settings.remote_disabled());
    }

    #[test]
    fn test_plan_replaced() {
        let mut settings = LocalSettings::default();
        let mut config = ConfigResponse::default();
        config.plan = PlanInfo {
            expiry_date: None,
            allowed_storage_gb: 2.0,
            storage_used_bytes: 10,
        };
        assert!(ConfigApplier::apply(&mut settings, &config).plan_changed);
        assert!(!ConfigApplier::apply(&mut settings, &config).plan_changed);
        assert_eq!(settings.plan.storage_used_bytes, 10);
    }
}
