//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// callsync - call log metadata sync and recording upload
#[derive(Parser, Debug)]
#[command(name = "callsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.callsync/data/callsync.db)
    #[arg(long, global = true, env = "CALLSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Sync API base URL
    #[arg(long, global = true, env = "CALLSYNC_API_URL")]
    pub api_url: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pair this device with an organization and user
    Pair(PairArgs),

    /// Import call log entries from a JSON file
    Import {
        /// JSON array of native call log entries
        file: PathBuf,

        /// Number of the device line, used when an entry names no line
        #[arg(long)]
        line: Option<String>,
    },

    /// Run one metadata sync pass
    Sync,

    /// Run one recording upload pass
    Upload {
        /// Directory scanned for recording files
        #[arg(long)]
        recordings: Option<PathBuf>,
    },

    /// Show sync status counts
    Status {
        /// List calls whose metadata is not yet synced
        #[arg(long)]
        pending: bool,

        /// Maximum calls to list with --pending
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Re-arm a failed call for the next pass
    Retry {
        /// Composite id of the call
        id: String,

        /// Retry the metadata push instead of the recording upload
        #[arg(long)]
        metadata: bool,
    },

    /// Edit the annotations of a call
    Annotate(AnnotateArgs),

    /// Edit the annotations of a contact
    Person(PersonArgs),

    /// Show the audit history of a call
    History {
        /// Composite id of the call
        id: String,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Run both engines on their schedules until interrupted
    Daemon {
        /// Directory scanned for recording files
        #[arg(long)]
        recordings: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct PairArgs {
    /// Organization id
    #[arg(long)]
    pub org: String,

    /// User id
    #[arg(long)]
    pub user: String,

    /// Device id (generated when omitted)
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// Composite id of the call
    pub id: String,

    #[arg(long)]
    pub note: Option<String>,

    /// Mark the call reviewed (true/false)
    #[arg(long)]
    pub reviewed: Option<bool>,

    #[arg(long)]
    pub label: Option<String>,

    /// Override the contact name shown for this call
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct PersonArgs {
    /// Phone number of the contact
    pub phone: String,

    #[arg(long)]
    pub note: Option<String>,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long)]
    pub name: Option<String>,
}
