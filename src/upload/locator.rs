//! Recording file lookup.

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tracing::debug;

use crate::error::Result;
use crate::model::CallRecord;

/// Finds the audio file a call was recorded to.
pub trait RecordingLocator: Send + Sync {
    /// `Ok(None)` means no file was found (yet).
    ///
    /// # Errors
    ///
    /// Returns an error if the recording storage cannot be read.
    fn locate(&self, call: &CallRecord) -> Result<Option<PathBuf>>;
}

const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "amr", "wav", "aac", "ogg", "opus", "3gp"];

/// Trailing digits compared against file names; country prefixes vary.
const MATCH_DIGITS: usize = 10;

/// Scans one directory of call recordings.
///
/// A file matches when its name contains the number's digits (or the
/// contact name) and its modification time lies within the call window,
/// widened by `slack` on both sides. The match closest to the call's end wins.
#[derive(Debug, Clone)]
pub struct FsRecordingLocator {
    dir: PathBuf,
    slack: Duration,
}

impl FsRecordingLocator {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slack: Duration::from_secs(5 * 60),
        }
    }

    #[must_use]
    pub fn with_slack(mut self, slack: Duration) -> Self {
        self.slack = slack;
        self
    }

    fn name_matches(call: &CallRecord, stem: &str) -> bool {
        let digits: String = call.phone_number.chars().filter(char::is_ascii_digit).collect();
        let key = &digits[digits.len().saturating_sub(MATCH_DIGITS)..];
        if !key.is_empty() {
            let stem_digits: String = stem.chars().filter(char::is_ascii_digit).collect();
            if stem_digits.contains(key) {
                return true;
            }
        }

        call.contact_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .is_some_and(|name| stem.to_lowercase().contains(&name.to_lowercase()))
    }
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn to_ms(d: Duration) -> i64 {
    d.as_millis() as i64
}

impl RecordingLocator for FsRecordingLocator {
    fn locate(&self, call: &CallRecord) -> Result<Option<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(None);
        }

        let slack = to_ms(self.slack);
        // Imported durations are unbounded.
        let call_end = call
            .call_timestamp
            .saturating_add(call.duration.saturating_mul(1000));
        let window = call.call_timestamp.saturating_sub(slack)..=call_end.saturating_add(slack);

        let mut best: Option<(u64, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_audio(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !Self::name_matches(call, stem) {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }
            let Ok(since_epoch) = metadata.modified()?.duration_since(UNIX_EPOCH) else {
                continue;
            };
            let modified = to_ms(since_epoch);
            if !window.contains(&modified) {
                continue;
            }

            let distance = modified.abs_diff(call_end);
            if best.as_ref().is_none_or(|(d, _)| distance < *d) {
                best = Some((distance, path));
            }
        }

        if let Some((_, path)) = &best {
            debug!(composite_id = %call.composite_id, path = %path.display(), "Located recording");
        }
        Ok(best.map(|(_, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CallType;

    fn recent_call(number: &str, name: Option<&str>) -> CallRecord {
        let start = chrono::Utc::now().timestamp_millis() - 60_000;
        let call = CallRecord::new("call_1".into(), number.into(), CallType::Incoming, 30, start);
        match name {
            Some(n) => call.with_contact_name(n),
            None => call,
        }
    }

    #[test]
    fn test_matches_by_number() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Call_15550100_in.m4a"), b"audio").unwrap();
        std::fs::write(dir.path().join("Call_15550199_in.m4a"), b"audio").unwrap();
        std::fs::write(dir.path().join("notes_15550100.txt"), b"text").unwrap();

        let locator = FsRecordingLocator::new(dir.path());
        let found = locator.locate(&recent_call("+1 555 0100", None)).unwrap().unwrap();
        assert!(found.ends_with("Call_15550100_in.m4a"));
    }

    #[test]
    fn test_matches_by_contact_name_and_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Ann Lee 2026.mp3"), b"audio").unwrap();
        std::fs::write(dir.path().join("Bob.mp3"), b"").unwrap();

        let locator = FsRecordingLocator::new(dir.path());
        assert!(
            locator
                .locate(&recent_call("999", Some("ann lee")))
                .unwrap()
                .is_some()
        );
        assert!(locator.locate(&recent_call("998", Some("Bob"))).unwrap().is_none());
    }

    #[test]
    fn test_outside_window_not_matched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("15550100.m4a"), b"audio").unwrap();

        let mut old = recent_call("15550100", None);
        old.call_timestamp -= 24 * 60 * 60 * 1000;
        let locator = FsRecordingLocator::new(dir.path());
        assert!(locator.locate(&old).unwrap().is_none());
    }

    #[test]
    fn test_huge_duration_saturates_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("15550100.m4a"), b"audio").unwrap();

        let mut call = recent_call("15550100", None);
        call.duration = i64::MAX / 10;
        let locator = FsRecordingLocator::new(dir.path());
        assert!(locator.locate(&call).unwrap().is_some());

        call.call_timestamp = i64::MAX - 1;
        assert!(locator.locate(&call).unwrap().is_none());
    }

    #[test]
    fn test_missing_dir_is_not_an_error() {
        let locator = FsRecordingLocator::new("/nonexistent/recordings");
        assert!(locator.locate(&recent_call("1", None)).unwrap().is_none());
    }
}
