//! One-shot `sync` and `upload` passes.

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::SharedStore;
use crate::sync::{MetadataSyncEngine, NoopTrigger, PassMode, SyncReport};
use crate::upload::{FsRecordingLocator, UploadEngine, UploadReport};
use colored::Colorize;
use std::path::PathBuf;

/// Run a single metadata pass.
///
/// Phase failures are reported, not returned: the pass still saved
/// whatever the reachable phases produced.
///
/// # Errors
///
/// Returns an error if the store or API endpoint is unavailable.
pub fn execute_sync(db_path: Option<&PathBuf>, api_url: Option<&str>, json: bool) -> Result<()> {
    let storage = super::open_existing(db_path)?;
    let config = EngineConfig::from_env()?;
    let remote = super::http_remote(api_url, &config)?;

    let engine = MetadataSyncEngine::new(SharedStore::new(storage), remote, config, NoopTrigger);
    let cancel = CancellationToken::new();
    let report =
        super::runtime()?.block_on(super::interruptible(&cancel, engine.run_pass(&cancel)))?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_sync_report(&report);
    }
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    match report.mode {
        PassMode::LocalOnly => {
            println!("{}", "Device not paired; nothing was synced.".yellow());
            return;
        }
        PassMode::RemoteDisabled => {
            println!("{}", "Sync is disabled for this organization.".yellow());
            return;
        }
        PassMode::Full => {}
    }

    println!("{}", "Metadata Sync".bold().underline());
    println!();
    println!(
        "  Pulled:   {} calls, {} persons",
        report.pull.calls_applied, report.pull.persons_applied
    );
    let push = &report.push;
    println!(
        "  Pushed:   {} new, {} changed, {} persons",
        push.new_synced, push.changed_synced, push.persons_synced
    );
    let rejected = push.new_rejected + push.changed_rejected + push.persons_rejected;
    if rejected > 0 {
        println!("  Rejected: {}", rejected.to_string().red());
    }
    if push.excluded > 0 {
        println!("  Excluded: {}", push.excluded);
    }

    if report.errors.is_empty() {
        if let Some(cursor) = report.cursor {
            println!();
            println!("Cursor advanced to {}", super::format_time(cursor));
        }
    } else {
        println!();
        for error in &report.errors {
            let label = if error.transient { "retry" } else { "error" };
            println!(
                "  {} {}: {}",
                label.red().bold(),
                error.phase.as_str(),
                error.message
            );
        }
    }
}

/// Run a single upload pass.
///
/// # Errors
///
/// Returns an error if the store, API endpoint or recordings directory is
/// unavailable, or reconciliation fails.
pub fn execute_upload(
    db_path: Option<&PathBuf>,
    api_url: Option<&str>,
    recordings: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let storage = super::open_existing(db_path)?;
    let config = EngineConfig::from_env()?;
    let dir = super::recordings_dir(recordings, &config)?;
    let remote = super::http_remote(api_url, &config)?;

    let engine = UploadEngine::new(
        SharedStore::new(storage),
        remote,
        FsRecordingLocator::new(dir),
        config,
    );
    let cancel = CancellationToken::new();
    let report =
        super::runtime()?.block_on(super::interruptible(&cancel, engine.run_pass(&cancel)))?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_upload_report(&report);
    }
    Ok(())
}

fn print_upload_report(report: &UploadReport) {
    if let Some(reason) = &report.gated {
        println!("{} {reason}", "Uploads paused:".yellow().bold());
        return;
    }

    println!("{}", "Recording Upload".bold().underline());
    println!();
    println!("  Completed:      {}", report.completed.to_string().green());
    if report.failed > 0 {
        println!("  Failed:         {}", report.failed.to_string().red());
    }
    if report.not_applicable > 0 {
        println!("  No recording:   {}", report.not_applicable);
    }
    if report.waiting_for_file > 0 {
        println!("  Waiting:        {}", report.waiting_for_file);
    }
    if report.excluded > 0 {
        println!("  Excluded:       {}", report.excluded);
    }
    if report.reconciled > 0 {
        println!("  Reconciled:     {}", report.reconciled);
    }
    if report.reset_stale > 0 {
        println!("  Reset (stale):  {}", report.reset_stale);
    }
    println!("  Remaining:      {}", report.remaining);
}
