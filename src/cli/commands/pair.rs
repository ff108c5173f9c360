//! Pair command implementation.
//!
//! Pairing stores the org/user identity the engines sync under. The device
//! id is the one capture already uses unless `--device` overrides it.

use crate::cli::PairArgs;
use crate::config::Pairing;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct PairOutput<'a> {
    paired: bool,
    #[serde(flatten)]
    pairing: &'a Pairing,
}

/// Execute the pair command.
///
/// # Errors
///
/// Returns an error if an id is blank or the settings cannot be saved.
pub fn execute(args: &PairArgs, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let org_id = args.org.trim();
    let user_id = args.user.trim();
    if org_id.is_empty() || user_id.is_empty() {
        return Err(Error::InvalidArgument(
            "--org and --user must not be empty".to_string(),
        ));
    }

    let mut storage = super::open_or_create(db_path)?;
    let mut settings = storage.load_settings()?;

    let device_id = match args.device.as_deref().map(str::trim) {
        Some(device) if !device.is_empty() => {
            settings.device_id = Some(device.to_string());
            device.to_string()
        }
        _ => settings.ensure_device_id(),
    };

    let pairing = Pairing {
        org_id: org_id.to_string(),
        user_id: user_id.to_string(),
        device_id,
    };
    settings.pairing = Some(pairing.clone());
    storage.save_settings(&settings)?;
    tracing::info!(org_id, user_id, device_id = %pairing.device_id, "Device paired");

    if json {
        let output = PairOutput {
            paired: true,
            pairing: &pairing,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Paired with organization {}", pairing.org_id);
        println!("  User:   {}", pairing.user_id);
        println!("  Device: {}", pairing.device_id);
    }

    Ok(())
}
