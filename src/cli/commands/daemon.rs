//! Daemon command: both engines under the scheduler until Ctrl-C.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::remote::HttpRemote;
use crate::scheduler::{
    job_fn, JobOutcome, RetryPolicy, Scheduler, WorkState, METADATA_WORK, UPLOAD_WORK,
};
use crate::storage::SharedStore;
use crate::sync::MetadataSyncEngine;
use crate::upload::{FsRecordingLocator, UploadEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long running passes get to reach a checkpoint after Ctrl-C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute the daemon command.
///
/// # Errors
///
/// Returns an error if the store, API endpoint or recordings directory is
/// unavailable, or the signal handler cannot be installed.
pub fn execute(
    db_path: Option<&PathBuf>,
    api_url: Option<&str>,
    recordings: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let storage = super::open_existing(db_path)?;
    let config = EngineConfig::from_env()?;
    let dir = super::recordings_dir(recordings, &config)?;
    let remote = Arc::new(super::http_remote(api_url, &config)?);

    if !json {
        println!(
            "callsync daemon running (metadata every {} min, uploads every {} min). Ctrl-C to stop.",
            config.metadata_interval.as_secs() / 60,
            config.upload_interval.as_secs() / 60
        );
    }

    super::runtime()?.block_on(serve(SharedStore::new(storage), remote, dir, config))?;

    if json {
        println!("{}", serde_json::json!({ "stopped": true }));
    } else {
        println!("Stopped.");
    }
    Ok(())
}

async fn serve(
    store: SharedStore,
    remote: Arc<HttpRemote>,
    dir: PathBuf,
    config: EngineConfig,
) -> Result<()> {
    let scheduler = Scheduler::new(RetryPolicy::default());

    // The scheduler's jobs own the engine.
    let metadata = Arc::new(MetadataSyncEngine::new(
        store.clone(),
        Arc::clone(&remote),
        config.clone(),
        scheduler.downgrade(),
    ));
    let upload = Arc::new(UploadEngine::new(
        store,
        remote,
        FsRecordingLocator::new(dir),
        config.clone(),
    ));

    scheduler.register(
        METADATA_WORK,
        true,
        job_fn(move |cancel| {
            let engine = Arc::clone(&metadata);
            async move {
                let report = engine.run_pass(&cancel).await?;
                info!(
                    pulled = report.pull.calls_applied,
                    pushed = report.push.new_synced + report.push.changed_synced,
                    errors = report.errors.len(),
                    "Metadata pass finished"
                );
                Ok::<_, anyhow::Error>(if report.needs_retry() {
                    JobOutcome::Retry
                } else {
                    JobOutcome::Done
                })
            }
        }),
    );

    scheduler.register(
        UPLOAD_WORK,
        true,
        job_fn(move |cancel| {
            let engine = Arc::clone(&upload);
            async move {
                let report = engine.run_pass(&cancel).await?;
                info!(
                    completed = report.completed,
                    failed = report.failed,
                    remaining = report.remaining,
                    "Upload pass finished"
                );
                Ok::<_, anyhow::Error>(if report.needs_rerun() {
                    JobOutcome::RunAgain
                } else {
                    JobOutcome::Done
                })
            }
        }),
    );

    let periodic = [
        scheduler.enqueue_periodic(METADATA_WORK, config.metadata_interval),
        scheduler.enqueue_periodic(UPLOAD_WORK, config.upload_interval),
    ];

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown();

    for handle in periodic {
        if let Err(e) = handle.await {
            warn!(error = %e, "Periodic trigger task failed");
        }
    }
    drain(&scheduler).await;
    Ok(())
}

/// Wait for running passes to observe the shutdown.
async fn drain(scheduler: &Scheduler) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while [METADATA_WORK, UPLOAD_WORK]
        .iter()
        .any(|name| scheduler.state(name) == Some(WorkState::Running))
    {
        if tokio::time::Instant::now() >= deadline {
            warn!("Passes still running at shutdown; in-flight uploads resume next start");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
