//! Metadata sync engine.
//!
//! One pass runs five phases in order: fetch config, pull updates, push
//! new calls in batches, push changed calls one by one, push person edits.
//! A remote failure ends its phase and is recorded in the [`SyncReport`];
//! later phases still run. The pull cursor only advances when every phase
//! completed, so a failed pass re-pulls the same window next time.
//!
//! Every network call goes through the pass's [`CancellationToken`]. A
//! cancelled pass returns `Err(Cancelled)` and has only written what the
//! server had already acknowledged.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{AppliedConfig, ConfigApplier, EngineConfig, LocalSettings, Pairing};
use crate::error::{Error, Result};
use crate::model::{normalize_phone, CallRecord};
use crate::remote::{BatchCall, RemoteService, UpdateCallRequest, UpdatePersonRequest};
use crate::storage::{Acknowledgement, PatchOutcome, SharedStore};

use super::types::{PassMode, Phase, PullStats, SyncReport};

/// Signals the recording upload engine that calls became uploadable.
pub trait UploadTrigger: Send + Sync {
    fn trigger_upload(&self);
}

/// Trigger that does nothing, for one-shot CLI passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrigger;

impl UploadTrigger for NoopTrigger {
    fn trigger_upload(&self) {}
}

/// Outcome of one remote call inside a phase.
enum Remote<T> {
    Ok(T),
    /// The server refused this record; captured per record.
    Rejected(String),
    /// The phase cannot continue; already recorded in the report.
    Failed,
}

/// Reconciles local call and person metadata with the remote service.
pub struct MetadataSyncEngine<R, T> {
    store: SharedStore,
    remote: R,
    config: EngineConfig,
    trigger: T,
}

impl<R: RemoteService, T: UploadTrigger> MetadataSyncEngine<R, T> {
    pub fn new(store: SharedStore, remote: R, config: EngineConfig, trigger: T) -> Self {
        Self {
            store,
            remote,
            config,
            trigger,
        }
    }

    /// Run one full pass.
    ///
    /// Without a pairing the pass is a local-only no-op. When the server
    /// disabled sync, only the config is fetched so re-enabling is noticed.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the token trips, or a store error. Remote
    /// failures are reported in the returned [`SyncReport`] instead.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let settings = self.store.with(|s| s.load_settings())?;
        let Some(pairing) = settings.pairing.clone() else {
            debug!("No pairing, running local-only");
            return Ok(SyncReport::with_mode(PassMode::LocalOnly));
        };

        let mut report = SyncReport::default();
        let pass_start = chrono::Utc::now().timestamp_millis();

        match self.fetch_config(&pairing, &settings, cancel).await {
            Ok(applied) => report.config = Some(applied),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) if is_remote(&e) => report.record(Phase::FetchConfig, &e),
            Err(e) => return Err(e),
        }

        if self.store.with(|s| s.load_settings())?.remote_disabled() {
            info!("Remote sync disabled by organization");
            report.mode = PassMode::RemoteDisabled;
            return Ok(report);
        }

        match self.pull_updates(&pairing, cancel).await {
            Ok(pull) => report.pull = pull,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) if is_remote(&e) => report.record(Phase::PullUpdates, &e),
            Err(e) => return Err(e),
        }

        self.push_updates(&pairing, cancel, &mut report).await?;

        if report.is_clean() {
            self.store.with(|s| s.save_cursor(pass_start))?;
            report.cursor = Some(pass_start);
        }

        if report.push.recordings_eligible > 0 {
            debug!(
                eligible = report.push.recordings_eligible,
                "Triggering recording upload"
            );
            self.trigger.trigger_upload();
        }

        info!(
            pulled = report.pull.calls_applied + report.pull.persons_applied,
            synced = report.push.new_synced + report.push.changed_synced,
            excluded = report.push.excluded,
            errors = report.errors.len(),
            "Metadata pass complete"
        );
        Ok(report)
    }

    /// Fetch settings, plan and exclusions and apply them locally.
    ///
    /// # Errors
    ///
    /// Returns the remote error, or a store error.
    pub async fn fetch_config(
        &self,
        pairing: &Pairing,
        settings: &LocalSettings,
        cancel: &CancellationToken,
    ) -> Result<AppliedConfig> {
        let config = cancel
            .run(self.remote.fetch_config(pairing, &settings.device))
            .await?;

        self.store.with(|s| {
            let mut current = s.load_settings()?;
            let applied = ConfigApplier::apply(&mut current, &config);
            s.save_settings(&current)?;
            let excluded = s.replace_exclusions(&config.excluded_contacts)?;
            debug!(
                changed_flags = applied.changed_flags.len(),
                changed_dates = applied.changed_dates.len(),
                excluded,
                "Applied server config"
            );
            Ok(applied)
        })
    }

    /// Fetch changes since the cursor and merge them (last writer wins).
    ///
    /// # Errors
    ///
    /// Returns the remote error, or a store error.
    pub async fn pull_updates(
        &self,
        pairing: &Pairing,
        cancel: &CancellationToken,
    ) -> Result<PullStats> {
        let cursor = self.store.with(|s| s.load_cursor())?.unwrap_or(0);
        let updates = cancel
            .run(self.remote.fetch_updates(pairing, cursor))
            .await?;

        self.store.with(|s| {
            let mut stats = PullStats::default();
            for update in &updates.call_updates {
                match s.apply_call_patch(update)? {
                    PatchOutcome::Applied => stats.calls_applied += 1,
                    PatchOutcome::Stale => stats.calls_stale += 1,
                    PatchOutcome::Unknown => {
                        debug!(composite_id = %update.unique_id, "Skipping update for unknown call");
                        stats.calls_unknown += 1;
                    }
                }
            }
            for update in &updates.person_updates {
                match s.apply_person_patch(update)? {
                    PatchOutcome::Applied => stats.persons_applied += 1,
                    PatchOutcome::Stale | PatchOutcome::Unknown => stats.persons_stale += 1,
                }
            }
            debug!(cursor, applied = stats.calls_applied, "Pulled updates");
            Ok(stats)
        })
    }

    /// Settle excluded calls locally, then push new calls, changed calls
    /// and pending persons.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or a store error.
    pub async fn push_updates(
        &self,
        pairing: &Pairing,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let (pending, excluded) = self
            .store
            .with(|s| Ok((s.calls_needing_metadata_sync()?, s.excluded_numbers()?)))?;

        let is_excluded = |call: &CallRecord| excluded.contains(&normalize_phone(&call.phone_number));
        let (skipped_new, new): (Vec<_>, Vec<_>) = pending.new.into_iter().partition(is_excluded);
        let (skipped_changed, changed): (Vec<_>, Vec<_>) =
            pending.changed.into_iter().partition(is_excluded);

        let skipped: Vec<&CallRecord> = skipped_new.iter().chain(&skipped_changed).collect();
        if !skipped.is_empty() {
            self.store.with(|s| {
                for call in &skipped {
                    s.mark_call_excluded(&call.composite_id)?;
                }
                Ok(())
            })?;
            report.push.excluded = skipped.len();
            debug!(count = skipped.len(), "Settled excluded calls without sending");
        }

        self.push_new_batches(pairing, &new, cancel, report).await?;
        self.push_changed(&changed, cancel, report).await?;
        self.push_persons(pairing, &excluded, cancel, report).await
    }

    /// Push never-acknowledged calls in fixed-size batches.
    ///
    /// A failed batch is left pending and the next batch still goes out.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or a store error.
    pub async fn push_new_batches(
        &self,
        pairing: &Pairing,
        calls: &[CallRecord],
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let batch_size = self.config.push_batch_size.max(1);

        for (batch_no, batch) in calls.chunks(batch_size).enumerate() {
            let payload: Vec<BatchCall> = batch.iter().map(to_batch_call).collect();
            report.push.batches_sent += 1;

            let response = match classify(
                cancel.run(self.remote.batch_sync_calls(pairing, &payload)).await,
                Phase::PushNew,
                report,
            )? {
                Remote::Ok(response) => response,
                Remote::Rejected(message) => {
                    let ids: Vec<String> = batch.iter().map(|c| c.composite_id.clone()).collect();
                    let failed = self.store.with(|s| s.mark_calls_failed(&ids, &message))?;
                    warn!(batch = batch_no, failed, error = %message, "Batch rejected");
                    report.push.batches_failed += 1;
                    report.push.new_rejected += failed;
                    continue;
                }
                Remote::Failed => {
                    warn!(batch = batch_no, size = batch.len(), "Batch failed, left pending");
                    report.push.batches_failed += 1;
                    continue;
                }
            };

            let acked: HashSet<&str> = response.synced_ids.iter().map(String::as_str).collect();
            let acks: Vec<Acknowledgement> = batch
                .iter()
                .filter(|c| acked.contains(c.composite_id.as_str()))
                .map(|c| Acknowledgement {
                    composite_id: c.composite_id.clone(),
                    pushed_updated_at: c.updated_at,
                })
                .collect();

            let eligible = self
                .store
                .with(|s| s.mark_calls_synced(&acks, response.server_time))?;
            report.push.new_synced += acks.len();
            report.push.new_unacknowledged += batch.len() - acks.len();
            report.push.recordings_eligible += eligible;
            debug!(batch = batch_no, synced = acks.len(), eligible, "Batch acknowledged");
        }
        Ok(())
    }

    /// Push changed calls one at a time.
    ///
    /// A transient failure ends the phase; the remaining calls go out next pass.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or a store error.
    pub async fn push_changed(
        &self,
        calls: &[CallRecord],
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        for call in calls {
            let request = UpdateCallRequest {
                unique_id: call.composite_id.clone(),
                reviewed: call.reviewed,
                note: call.note.clone(),
                caller_name: call.contact_name.clone(),
                updated_at: call.updated_at,
            };

            match classify(
                cancel.run(self.remote.update_call(&request)).await,
                Phase::PushChanged,
                report,
            )? {
                Remote::Ok(response) => {
                    let current = self.store.with(|s| {
                        s.mark_call_acknowledged(
                            &call.composite_id,
                            call.updated_at,
                            response.server_time,
                        )
                    })?;
                    if current {
                        report.push.changed_synced += 1;
                    } else {
                        debug!(composite_id = %call.composite_id, "Edited during push, stays pending");
                    }
                }
                Remote::Rejected(message) => {
                    self.store
                        .with(|s| s.mark_call_failed(&call.composite_id, &message))?;
                    warn!(composite_id = %call.composite_id, error = %message, "Call update rejected");
                    report.push.changed_rejected += 1;
                }
                Remote::Failed => break,
            }
        }
        Ok(())
    }

    /// Push pending person edits one at a time, then copy each pushed
    /// label onto the person's latest call.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or a store error.
    pub async fn push_persons(
        &self,
        pairing: &Pairing,
        excluded: &HashSet<String>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let persons = self.store.with(|s| s.pending_persons())?;

        for person in persons {
            if excluded.contains(&normalize_phone(&person.phone_number)) {
                self.store
                    .with(|s| s.clear_person_pending(&person.phone_number, person.updated_at))?;
                report.push.excluded += 1;
                continue;
            }

            let request = UpdatePersonRequest {
                phone: person.phone_number.clone(),
                org_id: pairing.org_id.clone(),
                person_note: person.person_note.clone(),
                label: person.label.clone(),
                name: person.contact_name.clone(),
                updated_at: person.updated_at,
            };

            match classify(
                cancel.run(self.remote.update_person(&request)).await,
                Phase::PushPersons,
                report,
            )? {
                Remote::Ok(true) => {
                    let cleared = self.store.with(|s| {
                        s.clear_person_pending(&person.phone_number, person.updated_at)
                    })?;
                    if cleared {
                        report.push.persons_synced += 1;
                    }
                    if let Some(label) = person.label.as_deref() {
                        if let Err(e) = self.store.with(|s| {
                            s.propagate_label_to_latest_call(&person.phone_number, Some(label))
                        }) {
                            warn!(phone = %person.phone_number, error = %e, "Label propagation failed");
                        }
                    }
                }
                Remote::Ok(false) => {
                    warn!(phone = %person.phone_number, "Person update not accepted");
                    report.push.persons_rejected += 1;
                }
                Remote::Rejected(message) => {
                    warn!(phone = %person.phone_number, error = %message, "Person update rejected");
                    report.push.persons_rejected += 1;
                }
                Remote::Failed => break,
            }
        }
        Ok(())
    }
}

/// Errors that originate from the remote service rather than the store.
fn is_remote(error: &Error) -> bool {
    !matches!(error, Error::Database(_) | Error::Io(_))
}

/// Sort a remote result into record-level, phase-level and pass-level outcomes.
fn classify<V>(result: Result<V>, phase: Phase, report: &mut SyncReport) -> Result<Remote<V>> {
    match result {
        Ok(value) => Ok(Remote::Ok(value)),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(Error::Rejected { status, message }) => {
            Ok(Remote::Rejected(format!("{status}: {message}")))
        }
        Err(e) if is_remote(&e) => {
            warn!(phase = phase.as_str(), error = %e, "Remote call failed");
            report.record(phase, &e);
            Ok(Remote::Failed)
        }
        Err(e) => Err(e),
    }
}

fn to_batch_call(call: &CallRecord) -> BatchCall {
    BatchCall {
        unique_id: call.composite_id.clone(),
        caller_name: call.contact_name.clone(),
        caller: call.phone_number.clone(),
        call_type: call.call_type,
        duration: call.duration,
        call_time: call.call_timestamp,
        device_phone: call.device_phone.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FLAG_SYNC_ENABLED, FLAG_RECORDING_UPLOAD};
    use crate::model::{CallType, MetadataSyncStatus, RecordingSyncStatus};
    use crate::remote::fake::FakeRemote;
    use crate::remote::{CallUpdate, ServerValue};
    use crate::storage::{CallAnnotation, PersonEdit, SqliteStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingTrigger(Arc<AtomicUsize>);

    impl UploadTrigger for CountingTrigger {
        fn trigger_upload(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store(paired: bool) -> SharedStore {
        let mut storage = SqliteStorage::open_memory().unwrap();
        if paired {
            let settings = LocalSettings {
                pairing: Some(Pairing {
                    org_id: "org_1".into(),
                    user_id: "user_1".into(),
                    device_id: "dev_1".into(),
                }),
                ..LocalSettings::default()
            };
            storage.save_settings(&settings).unwrap();
        }
        SharedStore::new(storage)
    }

    fn seed(store: &SharedStore, count: usize, duration: i64) -> Vec<String> {
        store
            .with(|s| {
                let mut ids = Vec::new();
                for i in 0..count {
                    let id = format!("call_{i:04}");
                    let call = CallRecord::new(
                        id.clone(),
                        format!("+1555{i:07}"),
                        CallType::Incoming,
                        duration,
                        10_000 + i64::try_from(i).unwrap(),
                    );
                    s.upsert_imported_call(&call)?;
                    ids.push(id);
                }
                Ok(ids)
            })
            .unwrap()
    }

    fn call(store: &SharedStore, id: &str) -> CallRecord {
        store.with(|s| s.get_call(id)).unwrap().unwrap()
    }

    fn engine(
        store: &SharedStore,
        remote: &Arc<FakeRemote>,
    ) -> MetadataSyncEngine<Arc<FakeRemote>, NoopTrigger> {
        MetadataSyncEngine::new(
            store.clone(),
            Arc::clone(remote),
            EngineConfig::default(),
            NoopTrigger,
        )
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_block_other_batches() {
        let store = store(true);
        let ids = seed(&store, 250, 0);
        let remote = Arc::new(FakeRemote::new());
        remote.state().timeout_batches.insert(1);

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        let sizes: Vec<usize> = remote.state().batch_requests.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(report.push.new_synced, 150);
        assert_eq!(report.push.batches_failed, 1);
        assert!(report.needs_retry());

        for (i, id) in ids.iter().enumerate() {
            let expected = if (100..200).contains(&i) {
                MetadataSyncStatus::Pending
            } else {
                MetadataSyncStatus::Synced
            };
            assert_eq!(call(&store, id).metadata_sync_status, expected, "{id}");
        }

        assert!(report.cursor.is_none());
        assert!(store.with(|s| s.load_cursor()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_excluded_numbers_never_sent() {
        let store = store(true);
        let ids = seed(&store, 3, 30);
        let remote = Arc::new(FakeRemote::new());
        remote.state().config.excluded_contacts = vec!["+1 555 000 0001".into()];

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.push.excluded, 1);

        let state = remote.state();
        assert!(
            state
                .batch_requests
                .iter()
                .flatten()
                .all(|c| c.caller != "+15550000001")
        );
        drop(state);

        let excluded = call(&store, &ids[1]);
        assert_eq!(excluded.metadata_sync_status, MetadataSyncStatus::Synced);
        assert_eq!(excluded.recording_sync_status, RecordingSyncStatus::NotApplicable);
        assert_eq!(report.push.recordings_eligible, 2);
    }

    #[tokio::test]
    async fn test_pull_reapplies_after_failed_pass() {
        let store = store(true);
        let ids = seed(&store, 1, 0);
        let local = call(&store, &ids[0]);
        let remote = Arc::new(FakeRemote::new());
        {
            let mut state = remote.state();
            state.updates.call_updates = vec![CallUpdate {
                unique_id: ids[0].clone(),
                reviewed: Some(true),
                note: Some("call back".into()),
                caller_name: None,
                updated_at: local.updated_at + 10_000,
            }];
            state.timeout_batches.insert(0);
        }
        let engine = engine(&store, &remote);

        let first = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.pull.calls_applied, 1);
        assert!(first.cursor.is_none());

        let second = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.pull.calls_stale, 1);
        assert!(second.cursor.is_some());
        assert_eq!(remote.state().update_cursors, vec![0, 0]);

        let merged = call(&store, &ids[0]);
        assert_eq!(merged.note.as_deref(), Some("call back"));
        assert!(merged.reviewed);
        assert_eq!(merged.metadata_sync_status, MetadataSyncStatus::Synced);
        assert_eq!(store.with(|s| s.sync_summary()).unwrap().total_calls, 1);
    }

    #[tokio::test]
    async fn test_unknown_pull_ids_are_counted_not_created() {
        let store = store(true);
        let remote = Arc::new(FakeRemote::new());
        remote.state().updates.call_updates = vec![CallUpdate {
            unique_id: "call_elsewhere".into(),
            reviewed: None,
            note: Some("x".into()),
            caller_name: None,
            updated_at: 5,
        }];

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.pull.calls_unknown, 1);
        assert!(store.with(|s| s.get_call("call_elsewhere")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changed_call_pushed_individually() {
        let store = store(true);
        let ids = seed(&store, 2, 0);
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(&store, &remote);
        engine.run_pass(&CancellationToken::new()).await.unwrap();

        store
            .with(|s| {
                s.annotate_call(
                    &ids[0],
                    &CallAnnotation {
                        note: Some("follow up".into()),
                        ..CallAnnotation::default()
                    },
                )
            })
            .unwrap();

        let report = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.push.changed_synced, 1);
        assert_eq!(report.push.batches_sent, 0);

        let state = remote.state();
        assert_eq!(state.update_call_requests.len(), 1);
        assert_eq!(state.update_call_requests[0].note.as_deref(), Some("follow up"));
        drop(state);

        let pushed = call(&store, &ids[0]);
        assert!(!pushed.is_changed());
        assert!(pushed.sync_error.is_none());
    }

    #[tokio::test]
    async fn test_rejected_change_captured_and_pass_continues() {
        let store = store(true);
        let ids = seed(&store, 1, 0);
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(&store, &remote);
        engine.run_pass(&CancellationToken::new()).await.unwrap();

        store
            .with(|s| {
                s.annotate_call(
                    &ids[0],
                    &CallAnnotation {
                        reviewed: Some(true),
                        ..CallAnnotation::default()
                    },
                )
            })
            .unwrap();
        remote.state().reject_update_call = true;

        let report = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.push.changed_rejected, 1);
        assert!(report.is_clean());

        let failed = call(&store, &ids[0]);
        assert_eq!(failed.metadata_sync_status, MetadataSyncStatus::Failed);
        assert!(failed.sync_error.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_unpaired_runs_local_only() {
        let store = store(false);
        seed(&store, 5, 10);
        let remote = Arc::new(FakeRemote::new());

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.mode, PassMode::LocalOnly);
        assert_eq!(remote.state().total_requests(), 0);
    }

    #[tokio::test]
    async fn test_remote_disabled_only_fetches_config() {
        let store = store(true);
        seed(&store, 2, 0);
        let remote = Arc::new(FakeRemote::new());
        remote
            .state()
            .config
            .settings
            .flags
            .insert(FLAG_SYNC_ENABLED.into(), ServerValue::locked(false));
        let engine = engine(&store, &remote);

        let report = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.mode, PassMode::RemoteDisabled);
        assert_eq!(remote.state().total_requests(), 1);

        remote
            .state()
            .config
            .settings
            .flags
            .insert(FLAG_SYNC_ENABLED.into(), ServerValue::locked(true));
        let report = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.mode, PassMode::Full);
        assert!(report.config.unwrap().sync_reenabled);
        assert_eq!(report.push.new_synced, 2);
    }

    #[tokio::test]
    async fn test_config_applied_and_persisted() {
        let store = store(true);
        let remote = Arc::new(FakeRemote::new());
        remote
            .state()
            .config
            .settings
            .flags
            .insert(FLAG_RECORDING_UPLOAD.into(), ServerValue::locked(true));

        engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        let settings = store.with(|s| s.load_settings()).unwrap();
        assert!(settings.recording_enabled());
        assert!(settings.is_locked(FLAG_RECORDING_UPLOAD));
    }

    #[tokio::test]
    async fn test_person_push_propagates_label() {
        let store = store(true);
        let ids = seed(&store, 1, 0);
        let phone = call(&store, &ids[0]).phone_number;
        store
            .with(|s| {
                s.edit_person(
                    &phone,
                    &PersonEdit {
                        label: Some("vip".into()),
                        ..PersonEdit::default()
                    },
                )
            })
            .unwrap();
        let remote = Arc::new(FakeRemote::new());

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.push.persons_synced, 1);
        assert_eq!(remote.state().person_requests[0].org_id, "org_1");

        assert!(store.with(|s| s.pending_persons()).unwrap().is_empty());
        assert_eq!(call(&store, &ids[0]).label.as_deref(), Some("vip"));
    }

    #[tokio::test]
    async fn test_person_push_refused_stays_pending() {
        let store = store(true);
        store
            .with(|s| s.edit_person("+15550009999", &PersonEdit::default()))
            .unwrap();
        let remote = Arc::new(FakeRemote::new());
        remote.state().person_success = false;

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.push.persons_rejected, 1);
        assert_eq!(store.with(|s| s.pending_persons()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_triggered_for_eligible_recordings() {
        let store = store(true);
        seed(&store, 2, 45);
        let remote = Arc::new(FakeRemote::new());
        let trigger = CountingTrigger::default();
        let engine = MetadataSyncEngine::new(
            store.clone(),
            Arc::clone(&remote),
            EngineConfig::default(),
            trigger.clone(),
        );

        let report = engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.push.recordings_eligible, 2);
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);

        // Nothing new: no second trigger.
        engine.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass_marks_nothing_synced() {
        let store = store(true);
        let ids = seed(&store, 3, 0);
        let remote = Arc::new(FakeRemote::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine(&store, &remote).run_pass(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(remote.state().total_requests(), 0);
        for id in &ids {
            assert_eq!(call(&store, id).metadata_sync_status, MetadataSyncStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_unacknowledged_ids_stay_pending() {
        let store = store(true);
        let ids = seed(&store, 3, 0);
        let remote = Arc::new(FakeRemote::new());
        remote.state().withhold_ack.insert(ids[2].clone());

        let report = engine(&store, &remote)
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.push.new_synced, 2);
        assert_eq!(report.push.new_unacknowledged, 1);
        assert_eq!(call(&store, &ids[2]).metadata_sync_status, MetadataSyncStatus::Pending);
    }
}
