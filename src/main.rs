//! callsync CLI entry point.

use callsync::cli::commands;
use callsync::cli::{Cli, Commands};
use callsync::error::Error;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();
    let api_url = cli.api_url.as_deref();

    match &cli.command {
        Commands::Pair(args) => commands::pair::execute(args, db, json),
        Commands::Import { file, line } => {
            commands::import::execute(file, line.as_deref(), db, json)
        }

        // Engine passes
        Commands::Sync => commands::pass::execute_sync(db, api_url, json),
        Commands::Upload { recordings } => {
            commands::pass::execute_upload(db, api_url, recordings.as_ref(), json)
        }
        Commands::Daemon { recordings } => {
            commands::daemon::execute(db, api_url, recordings.as_ref(), json)
        }

        Commands::Status { pending, limit } => commands::status::execute(db, *pending, *limit, json),

        // Local edits
        Commands::Retry { id, metadata } => commands::edit::execute_retry(id, *metadata, db, json),
        Commands::Annotate(args) => commands::edit::execute_annotate(args, db, json),
        Commands::Person(args) => commands::edit::execute_person(args, db, json),
        Commands::History { id, limit } => commands::edit::execute_history(id, *limit, db, json),
    }
}
