//! Status command implementation.

use crate::config::Pairing;
use crate::error::Result;
use crate::model::{CallRecord, PlanInfo};
use crate::storage::SyncSummary;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput<'a> {
    #[serde(flatten)]
    summary: &'a SyncSummary,
    pairing: Option<&'a Pairing>,
    plan: &'a PlanInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<Vec<PendingCall<'a>>>,
}

#[derive(Serialize)]
struct PendingCall<'a> {
    composite_id: &'a str,
    phone_number: &'a str,
    call_type: &'static str,
    call_timestamp: i64,
    metadata_sync_status: &'static str,
    recording_sync_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_error: Option<&'a str>,
}

impl<'a> From<&'a CallRecord> for PendingCall<'a> {
    fn from(call: &'a CallRecord) -> Self {
        Self {
            composite_id: &call.composite_id,
            phone_number: &call.phone_number,
            call_type: call.call_type.as_str(),
            call_timestamp: call.call_timestamp,
            metadata_sync_status: call.metadata_sync_status.as_str(),
            recording_sync_status: call.recording_sync_status.as_str(),
            sync_error: call.sync_error.as_deref(),
        }
    }
}

/// Execute status command.
///
/// # Errors
///
/// Returns an error if the database does not exist or a query fails.
pub fn execute(db_path: Option<&PathBuf>, pending: bool, limit: u32, json: bool) -> Result<()> {
    let storage = super::open_existing(db_path)?;
    let summary = storage.sync_summary()?;
    let settings = storage.load_settings()?;
    let pending_calls = if pending {
        Some(storage.list_calls(true, Some(limit))?)
    } else {
        None
    };

    if json {
        let output = StatusOutput {
            summary: &summary,
            pairing: settings.pairing.as_ref(),
            plan: &settings.plan,
            pending: pending_calls
                .as_ref()
                .map(|calls| calls.iter().map(PendingCall::from).collect()),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "callsync Status".bold().underline());
    println!();

    match &settings.pairing {
        Some(p) => {
            println!("Organization: {}", p.org_id);
            println!("User:         {}", p.user_id);
            println!("Device:       {}", p.device_id);
        }
        None => println!("{}", "Not paired (local only)".yellow()),
    }
    match summary.last_sync_time {
        Some(ms) => println!("Last sync:    {}", super::format_time(ms)),
        None => println!("Last sync:    {}", "never".dimmed()),
    }
    println!();

    println!("Calls: {}", summary.total_calls);
    if !summary.metadata.is_empty() {
        println!("{}", "Metadata:".blue().bold());
        for (status, count) in &summary.metadata {
            println!("  {:<16} {count}", paint(status));
        }
    }
    if !summary.recording.is_empty() {
        println!("{}", "Recordings:".blue().bold());
        for (status, count) in &summary.recording {
            println!("  {:<16} {count}", paint(status));
        }
    }
    if summary.pending_persons > 0 {
        println!("Pending contacts:  {}", summary.pending_persons);
    }
    if summary.excluded_contacts > 0 {
        println!("Excluded contacts: {}", summary.excluded_contacts);
    }

    let plan = &settings.plan;
    if plan.allowed_storage_gb > 0.0 {
        println!();
        println!(
            "Storage: {:.1}% of {} GB",
            plan.storage_ratio() * 100.0,
            plan.allowed_storage_gb
        );
        if let Some(expiry) = plan.expiry_date {
            println!("Plan expires: {expiry}");
        }
    }

    if let Some(calls) = &pending_calls {
        println!();
        if calls.is_empty() {
            println!("{}", "No unsynced calls.".green());
        } else {
            println!("{}", "Unsynced calls:".yellow().bold());
            for call in calls {
                print!(
                    "  {}  {:<16} {:<8} {}",
                    call.composite_id,
                    call.phone_number,
                    call.call_type.as_str(),
                    paint(call.metadata_sync_status.as_str())
                );
                match &call.sync_error {
                    Some(err) => println!("  {}", err.dimmed()),
                    None => println!(),
                }
            }
        }
    }

    Ok(())
}

fn paint(status: &str) -> ColoredString {
    match status {
        "SYNCED" | "COMPLETED" => status.green(),
        "FAILED" => status.red(),
        "PENDING" | "UPLOADING" | "COMPRESSING" => status.yellow(),
        _ => status.dimmed(),
    }
}
