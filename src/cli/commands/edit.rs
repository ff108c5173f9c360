//! Local edits: annotations, contact notes, retries and call history.
//!
//! These are the same entry points a device UI would call. Every edit bumps
//! `updated_at`, so the next metadata pass picks it up as a change.

use crate::cli::{AnnotateArgs, PersonArgs};
use crate::error::{Error, Result};
use crate::storage::{CallAnnotation, PersonEdit};
use std::path::PathBuf;

/// Re-arm a failed recording upload, or with `metadata` the metadata push.
///
/// # Errors
///
/// Returns `CallNotFound` or `InvalidTransition` if the call cannot be retried.
pub fn execute_retry(id: &str, metadata: bool, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let mut storage = super::open_existing(db_path)?;
    let target = if metadata {
        storage.retry_metadata(id)?;
        "metadata"
    } else {
        storage.retry_recording(id)?;
        "recording"
    };

    if json {
        let output = serde_json::json!({ "id": id, "retried": target });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Queued {target} retry for {id}");
    }
    Ok(())
}

/// Execute the annotate command.
///
/// # Errors
///
/// Returns an error if no field was given or the call does not exist.
pub fn execute_annotate(args: &AnnotateArgs, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let edit = CallAnnotation {
        note: args.note.clone(),
        reviewed: args.reviewed,
        label: args.label.clone(),
        contact_name: args.name.clone(),
    };
    if edit.note.is_none()
        && edit.reviewed.is_none()
        && edit.label.is_none()
        && edit.contact_name.is_none()
    {
        return Err(Error::InvalidArgument(
            "nothing to change: pass --note, --reviewed, --label or --name".to_string(),
        ));
    }

    let mut storage = super::open_existing(db_path)?;
    let call = storage.annotate_call(&args.id, &edit)?;

    if json {
        println!("{}", serde_json::to_string(&call)?);
    } else {
        println!("Updated call {}", call.composite_id);
        if let Some(note) = &call.note {
            println!("  Note:     {note}");
        }
        if let Some(label) = &call.label {
            println!("  Label:    {label}");
        }
        println!("  Reviewed: {}", call.reviewed);
    }
    Ok(())
}

/// Execute the person command.
///
/// # Errors
///
/// Returns an error if no field was given or the write fails.
pub fn execute_person(args: &PersonArgs, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let edit = PersonEdit {
        contact_name: args.name.clone(),
        person_note: args.note.clone(),
        label: args.label.clone(),
    };
    if edit.contact_name.is_none() && edit.person_note.is_none() && edit.label.is_none() {
        return Err(Error::InvalidArgument(
            "nothing to change: pass --note, --label or --name".to_string(),
        ));
    }

    let mut storage = super::open_existing(db_path)?;
    let person = storage.edit_person(&args.phone, &edit)?;

    if json {
        println!("{}", serde_json::to_string(&person)?);
    } else {
        println!("Updated contact {}", person.phone_number);
        if let Some(name) = &person.contact_name {
            println!("  Name:  {name}");
        }
        if let Some(label) = &person.label {
            println!("  Label: {label}");
        }
    }
    Ok(())
}

/// Show the audit events of a call, newest first.
///
/// # Errors
///
/// Returns `CallNotFound` if the call does not exist.
pub fn execute_history(id: &str, limit: u32, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = super::open_existing(db_path)?;
    if storage.get_call(id)?.is_none() {
        return Err(Error::CallNotFound { id: id.to_string() });
    }
    let events = storage.call_events(id, Some(limit))?;

    if json {
        let output: Vec<_> = events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "event": e.event_type.as_str(),
                    "actor": e.actor,
                    "old": e.old_value,
                    "new": e.new_value,
                    "comment": e.comment,
                    "created_at": e.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&output)?);
    } else if events.is_empty() {
        println!("No history for {id}");
    } else {
        for e in &events {
            let change = match (&e.old_value, &e.new_value) {
                (Some(old), Some(new)) => format!(" {old} -> {new}"),
                (None, Some(new)) => format!(" {new}"),
                _ => String::new(),
            };
            println!(
                "{}  {:<24} {:<8}{change}",
                super::format_time(e.created_at),
                e.event_type.as_str(),
                e.actor
            );
            if let Some(comment) = &e.comment {
                println!("    {comment}");
            }
        }
    }
    Ok(())
}
