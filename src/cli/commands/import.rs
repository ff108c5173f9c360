//! Import command implementation.
//!
//! Reads a JSON array of native call log entries (as exported from the
//! device) and runs them through the capture importer.

use crate::capture::{CaptureImporter, NativeCallEntry};
use crate::error::{Error, Result};
use crate::identity::CallLogResolver;
use std::path::{Path, PathBuf};

/// Execute the import command.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or a store write fails.
pub fn execute(
    file: &Path,
    line: Option<&str>,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(file).map_err(|e| {
        Error::InvalidArgument(format!("cannot read {}: {e}", file.display()))
    })?;
    let entries: Vec<NativeCallEntry> = serde_json::from_str(&raw)?;

    let mut storage = super::open_or_create(db_path)?;
    let mut settings = storage.load_settings()?;
    let first_import = settings.device_id.is_none();
    let device_id = settings.ensure_device_id();
    if first_import {
        storage.save_settings(&settings)?;
    }

    let mut resolver = CallLogResolver::new();
    if let Some(line) = line {
        resolver = resolver.with_default_line(line);
    }

    let importer = CaptureImporter::new(resolver, &device_id);
    let stats = importer.import(&mut storage, &entries, settings.track_start_date())?;

    if json {
        let output = serde_json::json!({
            "file": file.display().to_string(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Imported {} of {} entries", stats.created, stats.scanned);
        if stats.existing > 0 {
            println!("  Already known:      {}", stats.existing);
        }
        if stats.before_start > 0 {
            println!("  Before start date:  {}", stats.before_start);
        }
        if stats.untracked > 0 {
            println!("  Untracked types:    {}", stats.untracked);
        }
    }

    Ok(())
}
