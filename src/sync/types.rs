//! Pass reports for the metadata sync engine.

use serde::Serialize;

use crate::config::AppliedConfig;
use crate::error::Error;

/// Phase of a metadata pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FetchConfig,
    PullUpdates,
    PushNew,
    PushChanged,
    PushPersons,
}

impl Phase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FetchConfig => "fetch_config",
            Self::PullUpdates => "pull_updates",
            Self::PushNew => "push_new",
            Self::PushChanged => "push_changed",
            Self::PushPersons => "push_persons",
        }
    }
}

/// A remote failure that kept a phase from completing.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
    pub transient: bool,
}

/// How far a pass got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    /// All phases ran.
    #[default]
    Full,
    /// No pairing: nothing leaves the device.
    LocalOnly,
    /// The organization switched sync off; only the config was fetched.
    RemoteDisabled,
}

/// Merge counts of the pull phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullStats {
    pub calls_applied: usize,
    pub calls_stale: usize,
    /// Patches for calls this device never captured.
    pub calls_unknown: usize,
    pub persons_applied: usize,
    pub persons_stale: usize,
}

/// Counts of the push phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushStats {
    pub excluded: usize,
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub new_synced: usize,
    pub new_rejected: usize,
    /// Sent but missing from the server's `synced_ids`.
    pub new_unacknowledged: usize,
    pub changed_synced: usize,
    pub changed_rejected: usize,
    pub persons_synced: usize,
    pub persons_rejected: usize,
    /// Calls whose recording became uploadable in this pass.
    pub recordings_eligible: usize,
}

/// Outcome of one metadata pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub mode: PassMode,
    pub config: Option<AppliedConfig>,
    pub pull: PullStats,
    pub push: PushStats,
    pub errors: Vec<PhaseError>,
    /// New cursor value, when the pass advanced it.
    pub cursor: Option<i64>,
}

impl SyncReport {
    pub(crate) fn with_mode(mode: PassMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, phase: Phase, error: &Error) {
        self.errors.push(PhaseError {
            phase,
            message: error.to_string(),
            transient: error.is_transient(),
        });
    }

    /// Every phase completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// A transient failure left work behind; the scheduler should back off and retry.
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        self.errors.iter().any(|e| e.transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_retry_classification() {
        let mut report = SyncReport::default();
        assert!(report.is_clean());

        report.record(
            Phase::PushPersons,
            &Error::Rejected {
                status: 400,
                message: "bad".into(),
            },
        );
        assert!(!report.is_clean());
        assert!(!report.needs_retry());

        report.record(Phase::PushNew, &Error::Transient("timeout".into()));
        assert!(report.needs_retry());
        assert_eq!(report.errors[1].phase.as_str(), "push_new");
    }
}
