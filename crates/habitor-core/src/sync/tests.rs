//! End-to-end sync behaviour over a real SQLite store and the in-memory remote

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use super::*;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{LocalStore, SqliteLocalStore};
use crate::identity::SessionIdentity;
use crate::models::{
    HabitDetails, LocalId, NewQueueEntry, OperationType, QueueEntry, Record, RecordFields, RemoteKey,
};
use crate::remote::{InMemoryRemoteStore, RemoteCalls, RemoteStore};
use crate::util::now_millis;

const ACCOUNT: &str = "alice";
const DAY_MS: i64 = 86_400_000;

struct Harness {
    local: Arc<SqliteLocalStore>,
    remote: InMemoryRemoteStore,
    connectivity: ConnectivityMonitor,
    identity: Arc<SessionIdentity>,
    repo: RecordRepository,
    coordinator: Arc<SyncCoordinator>,
    resolver: ConflictResolver,
}

impl Harness {
    fn new(online: bool, signed_in: bool) -> Self {
        let local = Arc::new(SqliteLocalStore::open_in_memory().unwrap());
        let remote = InMemoryRemoteStore::new();
        let connectivity = ConnectivityMonitor::new(online);
        let identity = Arc::new(SessionIdentity::new("device_test"));
        if signed_in {
            identity.sign_in(ACCOUNT);
        }

        let ctx = SyncContext::new(
            local.clone(),
            Arc::new(remote.clone()),
            connectivity.clone(),
            identity.clone(),
        );
        let coordinator = Arc::new(SyncCoordinator::new(ctx.clone()));
        let resolver = ConflictResolver::new(ctx.clone(), coordinator.gate());
        let repo = RecordRepository::new(ctx);

        Self {
            local,
            remote,
            connectivity,
            identity,
            repo,
            coordinator,
            resolver,
        }
    }

    fn record(&self, local_id: LocalId) -> Record {
        self.local.get_by_id(local_id).unwrap().unwrap()
    }

    fn remote_names(&self) -> BTreeSet<String> {
        self.remote
            .documents(ACCOUNT)
            .into_iter()
            .map(|document| document.fields.name)
            .collect()
    }

    fn local_active_names(&self) -> BTreeSet<String> {
        self.repo
            .list_active()
            .unwrap()
            .into_iter()
            .map(|record| record.name)
            .collect()
    }

    fn pending(&self) -> usize {
        self.coordinator.pending_count().unwrap()
    }
}

fn fields(name: &str, last_synced_at: i64) -> RecordFields {
    Record::new(name).to_fields(last_synced_at)
}

fn names(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(ToString::to_string).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn local_write_survives_remote_outage() {
    let h = Harness::new(true, true);
    h.remote.set_available(false);

    let local_id = h.repo.insert(Record::new("Drink Water")).unwrap();
    h.repo.wait_for_remote_writes().await;

    let record = h.record(local_id);
    assert_eq!(record.name, "Drink Water");
    assert!(!record.is_synced());
    assert_eq!(h.pending(), 1);
    assert!(h.remote.documents(ACCOUNT).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_writes_upload_once_back_online() {
    let h = Harness::new(false, true);

    let ids: Vec<LocalId> = ["Read", "Run", "Stretch"]
        .into_iter()
        .map(|name| h.repo.insert(Record::new(name)).unwrap())
        .collect();
    assert_eq!(h.pending(), 3);
    assert_eq!(h.remote.calls().writes(), 0);

    h.connectivity.set_online(true);
    let outcome = h.coordinator.sync_now().await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.drained, 3);
    assert_eq!(h.pending(), 0);
    assert_eq!(h.remote_names(), names(&["Read", "Run", "Stretch"]));
    for id in ids {
        let record = h.record(id);
        let key = record.remote_key.clone().expect("uploaded record has a key");
        let document = h.remote.document(ACCOUNT, &key).unwrap();
        assert_eq!(document.last_synced_at, record.last_synced_at);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_skips_stuck_entry_and_keeps_order() {
    let h = Harness::new(false, true);
    for name in ["First", "Stuck", "Last"] {
        h.repo.insert(Record::new(name)).unwrap();
    }
    h.remote.reject_writes_named("Stuck");

    h.connectivity.set_online(true);
    let outcome = h.coordinator.sync_now().await;

    assert!(!outcome.success);
    assert_eq!(outcome.drained, 2);
    assert_eq!(outcome.pending, 1);
    assert_eq!(h.remote_names(), names(&["First", "Last"]));

    let remaining = h.local.list_queue().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].snapshot.name, "Stuck");
    assert_eq!(h.remote.calls().create, 3);

    // The stuck entry goes through once the remote accepts it
    h.remote.accept_all_writes();
    let outcome = h.coordinator.sync_now().await;
    assert!(outcome.success);
    assert_eq!(h.pending(), 0);
    assert_eq!(h.remote_names(), names(&["First", "Stuck", "Last"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn drink_water_offline_then_online() {
    let h = Harness::new(false, true);

    let local_id = h.repo.insert(Record::new("Drink Water")).unwrap();
    assert_eq!(h.pending(), 1);

    h.connectivity.set_online(true);
    let outcome = h.coordinator.sync_now().await;
    assert!(outcome.success);
    assert_eq!(h.pending(), 0);

    let record = h.record(local_id);
    assert!(record.is_synced());
    assert!(record.last_synced_at > 0);

    let documents = h.remote.documents(ACCOUNT);
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].fields.name, "Drink Water");
    assert_eq!(Some(documents[0].key.clone()), record.remote_key);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_is_idempotent() {
    let h = Harness::new(true, true);
    h.remote.seed(ACCOUNT, fields("Journal", 1_000));
    h.remote.seed(ACCOUNT, fields("Floss", 2_000));

    let first = h.coordinator.sync_now().await;
    assert_eq!(first.imported, 2);
    let after_first = h.local.get_all().unwrap();

    let second = h.coordinator.sync_now().await;
    assert_eq!(second.imported, 0);
    assert_eq!(second.overwritten, 0);

    let after_second = h.local.get_all().unwrap();
    assert_eq!(after_second.len(), 2);
    assert_eq!(
        after_first.iter().map(|r| (&r.local_id, &r.name)).collect::<Vec<_>>(),
        after_second.iter().map(|r| (&r.local_id, &r.name)).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_overwrites_with_newer_remote_and_keeps_local_id() {
    let h = Harness::new(true, true);
    let local_id = h.repo.insert(Record::new("Walk")).unwrap();
    h.repo.wait_for_remote_writes().await;
    let key = h.record(local_id).remote_key.unwrap();

    let newer = fields("Walk 10k steps", now_millis() + 60_000);
    h.remote.set(ACCOUNT, &key, &newer).await.unwrap();

    let outcome = h.coordinator.sync_now().await;
    assert_eq!(outcome.overwritten, 1);

    let record = h.record(local_id);
    assert_eq!(record.name, "Walk 10k steps");
    assert_eq!(record.remote_key, Some(key));
    assert_eq!(h.local.get_all().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_ignores_later_remote_write_from_slow_clock() {
    // Timestamps come from each writer's clock. A device running a day
    // behind loses to an older local sync even though its write is newer.
    let h = Harness::new(true, true);
    let local_id = h.repo.insert(Record::new("Meditate")).unwrap();
    h.repo.wait_for_remote_writes().await;
    let record = h.record(local_id);
    let key = record.remote_key.clone().unwrap();

    let from_slow_clock = fields("Meditate 20 minutes", record.last_synced_at - DAY_MS);
    h.remote.set(ACCOUNT, &key, &from_slow_clock).await.unwrap();

    let outcome = h.coordinator.sync_now().await;
    assert_eq!(outcome.overwritten, 0);
    assert_eq!(h.record(local_id).name, "Meditate");
    assert_eq!(
        h.remote.document(ACCOUNT, &key).unwrap().name,
        "Meditate 20 minutes"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_not_required_when_offline_or_signed_out() {
    let offline = Harness::new(false, true);
    assert_eq!(offline.coordinator.sync_now().await, SyncOutcome::not_required());

    let signed_out = Harness::new(true, false);
    assert_eq!(
        signed_out.coordinator.sync_now().await,
        SyncOutcome::not_required()
    );
    assert_eq!(signed_out.remote.calls().list_all, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn signed_out_writes_stay_local() {
    let h = Harness::new(true, false);

    let local_id = h.repo.insert(Record::new("Read")).unwrap();
    h.repo.delete(local_id).unwrap();
    h.repo.wait_for_remote_writes().await;

    assert_eq!(h.pending(), 0);
    assert_eq!(h.remote.calls(), RemoteCalls::default());
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_rejects_empty_name() {
    let h = Harness::new(true, true);
    let error = h.repo.insert(Record::new("   ")).unwrap_err();
    assert!(matches!(error, crate::error::Error::InvalidInput(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn quick_update_after_insert_does_not_duplicate() {
    let h = Harness::new(true, true);
    h.remote.set_latency(Duration::from_millis(20));

    let local_id = h.repo.insert(Record::new("Draft")).unwrap();
    let mut edited = h.record(local_id);
    edited.name = "Final".to_string();
    h.repo.update(&edited).unwrap();
    h.repo.wait_for_remote_writes().await;

    let documents = h.remote.documents(ACCOUNT);
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].fields.name, "Final");
    assert_eq!(h.remote.calls().create, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_write_is_queued() {
    let h = Harness::new(true, true);
    h.remote.reject_writes_named("Bad");

    h.repo.insert(Record::new("Bad")).unwrap();
    h.repo.wait_for_remote_writes().await;

    let queued = h.local.list_queue().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].operation, OperationType::Insert);
}

#[tokio::test(flavor = "multi_thread")]
async fn trash_restore_and_purge_follow_remote() {
    let h = Harness::new(true, true);
    let local_id = h.repo.insert(Record::new("Yoga")).unwrap();
    h.repo.wait_for_remote_writes().await;
    let key = h.record(local_id).remote_key.unwrap();

    h.repo.delete(local_id).unwrap();
    h.repo.wait_for_remote_writes().await;
    assert!(h.remote.document(ACCOUNT, &key).is_none());
    assert_eq!(h.repo.list_trash().unwrap().len(), 1);

    h.repo.restore(local_id).unwrap();
    h.repo.wait_for_remote_writes().await;
    let restored = h.remote.document(ACCOUNT, &key).unwrap();
    assert!(!restored.deleted);
    assert_eq!(h.repo.list_active().unwrap().len(), 1);

    h.repo.purge(local_id).unwrap();
    h.repo.wait_for_remote_writes().await;
    assert!(h.remote.documents(ACCOUNT).is_empty());
    assert!(h.repo.get(local_id).unwrap().is_none());
    assert_eq!(h.pending(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_purge_replays_delete_from_snapshot() {
    let h = Harness::new(true, true);
    let local_id = h.repo.insert(Record::new("Swim")).unwrap();
    h.repo.wait_for_remote_writes().await;

    h.connectivity.set_online(false);
    h.repo.purge(local_id).unwrap();
    assert_eq!(h.pending(), 1);

    h.connectivity.set_online(true);
    let outcome = h.coordinator.sync_now().await;
    assert!(outcome.success);
    assert!(h.remote.documents(ACCOUNT).is_empty());
    assert!(h.local.get_all().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_insert_for_purged_record_is_dropped() {
    let h = Harness::new(false, true);
    let local_id = h.repo.insert(Record::new("Gone")).unwrap();
    h.repo.purge(local_id).unwrap();

    h.connectivity.set_online(true);
    let outcome = h.coordinator.sync_now().await;
    assert!(outcome.success);
    assert_eq!(h.pending(), 0);
    assert_eq!(h.remote.calls().writes(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_triggers_coalesce_into_one_rerun() {
    let h = Harness::new(true, true);
    h.remote.set_latency(Duration::from_millis(150));

    let coordinator = Arc::clone(&h.coordinator);
    let first = tokio::spawn(async move { coordinator.sync_now().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second = h.coordinator.sync_now().await;
    let third = h.coordinator.sync_now().await;
    assert_eq!(second, SyncOutcome::coalesced());
    assert_eq!(third, SyncOutcome::coalesced());

    let first = first.await.unwrap();
    assert!(first.success);
    assert_eq!(h.remote.calls().list_all, 2);
    assert_eq!(h.coordinator.phase(), SyncPhase::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn phase_updates_follow_session() {
    let h = Harness::new(true, true);
    h.remote.set_latency(Duration::from_millis(50));
    let mut phases = h.coordinator.phase_updates();

    let coordinator = Arc::clone(&h.coordinator);
    let session = tokio::spawn(async move { coordinator.sync_now().await });

    phases
        .wait_for(|phase| *phase == SyncPhase::Pulling)
        .await
        .unwrap();
    session.await.unwrap();
    assert_eq!(*phases.borrow_and_update(), SyncPhase::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_listener_drains_queue() {
    let h = Harness::new(false, true);
    h.repo.insert(Record::new("Walk")).unwrap();
    assert_eq!(h.pending(), 1);

    let (events, mut outcomes) = mpsc::channel(4);
    let listener = h.coordinator.spawn_reconnect_listener(Some(events));
    h.connectivity.set_online(true);

    let outcome = tokio::time::timeout(Duration::from_secs(2), outcomes.recv())
        .await
        .expect("listener should sync after reconnect")
        .expect("listener alive");
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(h.pending(), 0);
    assert_eq!(h.remote_names(), names(&["Walk"]));
    listener.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn force_upload_restores_lost_remote_data() {
    let h = Harness::new(true, true);
    for name in ["Read", "Run"] {
        h.repo.insert(Record::new(name)).unwrap();
    }
    h.repo.wait_for_remote_writes().await;
    for document in h.remote.documents(ACCOUNT) {
        h.remote.delete(ACCOUNT, &document.key).await.unwrap();
    }

    let outcome = h.coordinator.force_upload_all().await;
    assert!(outcome.success);
    assert_eq!(h.remote_names(), names(&["Read", "Run"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_queue_discards_pending_work() {
    let h = Harness::new(false, true);
    h.repo.insert(Record::new("Read")).unwrap();
    h.repo.insert(Record::new("Run")).unwrap();

    assert_eq!(h.coordinator.clear_queue().unwrap(), 2);
    assert_eq!(h.pending(), 0);
}

/// Records created while signed out, then a sign-in to `ACCOUNT`
async fn signed_out_device_with(h: &Harness, local: &[&str]) -> Vec<LocalId> {
    let ids = local
        .iter()
        .map(|name| h.repo.insert(Record::new(*name)).unwrap())
        .collect();
    h.repo.wait_for_remote_writes().await;
    h.identity.sign_in(ACCOUNT);
    ids
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_check_counts_both_sides() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Cloud", 1));
    signed_out_device_with(&h, &["Local A", "Local B"]).await;

    let check = h.resolver.check_merge_needed(ACCOUNT).await.unwrap();
    assert_eq!(
        check,
        MergeCheck {
            needed: true,
            local_unsynced: 2,
            remote_count: 1
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_check_skips_remote_without_unsynced_locals() {
    let h = Harness::new(true, true);
    h.remote.seed(ACCOUNT, fields("Cloud", 1));

    let check = h.resolver.check_merge_needed(ACCOUNT).await.unwrap();
    assert_eq!(check, MergeCheck::default());
    assert_eq!(h.remote.calls().list_all, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_check_assumes_needed_when_remote_unreachable() {
    let h = Harness::new(true, false);
    signed_out_device_with(&h, &["Local"]).await;
    h.remote.set_available(false);

    let check = h.resolver.check_merge_needed(ACCOUNT).await.unwrap();
    assert!(check.needed);
    assert_eq!(check.remote_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_local_replaces_remote_with_local_records() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Cloud 1", 1));
    h.remote.seed(ACCOUNT, fields("Cloud 2", 1));
    let ids = signed_out_device_with(&h, &["Local 1", "Local 2"]).await;

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::KeepLocal)
        .await;

    assert!(report.success, "{}", report.message);
    assert_eq!(report.deleted_remote, 2);
    assert_eq!(report.uploaded, 2);
    assert_eq!(h.remote_names(), names(&["Local 1", "Local 2"]));
    for id in ids {
        let key = h.record(id).remote_key.unwrap();
        assert!(h.remote.document(ACCOUNT, &key).is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_cloud_replaces_unsynced_locals_with_remote() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Cloud A", 1));
    h.remote.seed(ACCOUNT, fields("Cloud B", 1));
    signed_out_device_with(&h, &["Local"]).await;

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::KeepCloud)
        .await;

    assert!(report.success);
    assert_eq!(report.deleted_local, 1);
    assert_eq!(report.imported, 2);
    assert_eq!(h.local_active_names(), names(&["Cloud A", "Cloud B"]));
    assert!(h.repo.list_active().unwrap().iter().all(Record::is_synced));
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_cloud_aborts_without_remote_listing() {
    let h = Harness::new(true, false);
    signed_out_device_with(&h, &["Local"]).await;
    h.remote.set_available(false);

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::KeepCloud)
        .await;

    assert!(!report.success);
    assert_eq!(report.failures[0].action, MergeAction::ListRemote);
    assert_eq!(h.local_active_names(), names(&["Local"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_both_prefers_newer_remote_and_keeps_local_id() {
    let h = Harness::new(true, false);
    let cloud = RecordFields {
        details: HabitDetails {
            note: "from cloud".to_string(),
            ..HabitDetails::default()
        },
        ..fields("drink water", 5_000)
    };
    let key = h.remote.seed(ACCOUNT, cloud);
    let ids = signed_out_device_with(&h, &["Drink Water"]).await;

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::MergeBoth)
        .await;

    assert!(report.success);
    assert_eq!(report.overwritten, 1);
    let record = h.record(ids[0]);
    assert_eq!(record.local_id, ids[0]);
    assert_eq!(record.name, "drink water");
    assert_eq!(record.details.note, "from cloud");
    assert_eq!(record.remote_key, Some(key));
    assert_eq!(h.local.get_all().unwrap().len(), 1);
    assert_eq!(h.remote.documents(ACCOUNT).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_both_writes_local_over_unstamped_remote() {
    let h = Harness::new(true, false);
    let key = h.remote.seed(ACCOUNT, fields("READ", 0));
    let ids = signed_out_device_with(&h, &["Read"]).await;

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::MergeBoth)
        .await;

    assert!(report.success);
    assert_eq!(report.uploaded, 1);
    assert_eq!(h.record(ids[0]).remote_key, Some(key.clone()));
    assert_eq!(h.remote.document(ACCOUNT, &key).unwrap().name, "Read");
    assert_eq!(h.remote.documents(ACCOUNT).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_both_unions_unmatched_records() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Run", 10));
    signed_out_device_with(&h, &["Read"]).await;

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::MergeBoth)
        .await;

    assert_eq!((report.uploaded, report.imported), (1, 1));
    assert_eq!(h.local_active_names(), names(&["Read", "Run"]));
    assert_eq!(h.remote_names(), names(&["Read", "Run"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_both_matches_each_remote_document_once() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Walk", 10));
    signed_out_device_with(&h, &["Walk", "walk"]).await;

    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::MergeBoth)
        .await;

    assert_eq!(report.overwritten, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(h.remote.documents(ACCOUNT).len(), 2);
    assert_eq!(h.local.get_all().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_both_uploads_locals_when_listing_fails() {
    let h = Harness::new(true, false);
    signed_out_device_with(&h, &["Read"]).await;

    h.remote.set_available(false);
    let report = h
        .resolver
        .execute_merge(ACCOUNT, MergeStrategy::MergeBoth)
        .await;

    assert!(!report.success);
    assert_eq!(report.failures[0].action, MergeAction::ListRemote);
    // The upload failed too, so the record waits in the queue
    assert_eq!(h.pending(), 1);

    h.remote.set_available(true);
    h.coordinator.sync_now().await;
    assert_eq!(h.remote_names(), names(&["Read"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_sign_in_runs_chosen_merge_then_syncs() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Cloud", 1));
    h.repo.insert(Record::new("Local")).unwrap();
    h.repo.wait_for_remote_writes().await;

    let outcome = complete_sign_in(&h.identity, &h.resolver, &h.coordinator, ACCOUNT, |check| {
        assert_eq!(check.remote_count, 1);
        Some(MergeStrategy::MergeBoth)
    })
    .await
    .unwrap();

    assert!(outcome.check.needed);
    assert!(outcome.merge.unwrap().success);
    assert!(outcome.sync.success);
    assert_eq!(h.local_active_names(), names(&["Cloud", "Local"]));
    assert_eq!(h.remote_names(), names(&["Cloud", "Local"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_sign_in_merge_keeps_account_and_local_data() {
    let h = Harness::new(true, false);
    h.remote.seed(ACCOUNT, fields("Cloud", 1));
    let local_id = h.repo.insert(Record::new("Local")).unwrap();

    let outcome = complete_sign_in(&h.identity, &h.resolver, &h.coordinator, ACCOUNT, |_| None)
        .await
        .unwrap();

    assert!(outcome.merge.is_none());
    assert_eq!(h.identity.account().as_deref(), Some(ACCOUNT));
    assert!(!h.record(local_id).is_synced());
    // The normal pull still brings the cloud record down
    assert_eq!(h.local_active_names(), names(&["Cloud", "Local"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_delete_uses_key_assigned_after_snapshot() {
    let h = Harness::new(false, true);
    let local_id = h.repo.insert(Record::new("Nap")).unwrap();
    h.repo.delete(local_id).unwrap();

    let queue = h.local.list_queue().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[1].snapshot_remote_key(), None::<&RemoteKey>);

    h.connectivity.set_online(true);
    let outcome = h.coordinator.sync_now().await;
    assert!(outcome.success);
    assert!(h.remote.documents(ACCOUNT).is_empty());
    assert_eq!(h.pending(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_during_merge_waits_and_syncs() {
    let h = Harness::new(false, true);
    h.remote.seed(ACCOUNT, fields("Cloud", 1));
    h.repo.insert(Record::new("Queued")).unwrap();
    assert_eq!(h.pending(), 1);

    h.connectivity.set_online(true);
    h.remote.set_latency(Duration::from_millis(100));

    let (report, outcome) = tokio::join!(
        h.resolver.execute_merge(ACCOUNT, MergeStrategy::MergeBoth),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.coordinator.sync_now().await
        }
    );

    assert!(report.success);
    assert_ne!(outcome, SyncOutcome::coalesced());
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(h.pending(), 0);
    assert_eq!(h.local_active_names(), names(&["Cloud", "Queued"]));
    assert_eq!(h.remote_names(), names(&["Cloud", "Queued"]));
}

/// `SqliteLocalStore` that can stall reads on one thread or fail listings
struct FlakyStore {
    inner: SqliteLocalStore,
    stalled_reader: Mutex<Option<ThreadId>>,
    broken_listing: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: SqliteLocalStore::open_in_memory().unwrap(),
            stalled_reader: Mutex::new(None),
            broken_listing: AtomicBool::new(false),
        }
    }

    /// Reads on the calling thread return their row after a delay
    fn stall_reads_on_this_thread(&self) {
        *self.stalled_reader.lock().unwrap() = Some(std::thread::current().id());
    }

    fn break_listing(&self) {
        self.broken_listing.store(true, Ordering::SeqCst);
    }
}

impl LocalStore for FlakyStore {
    fn get_all(&self) -> crate::Result<Vec<Record>> {
        if self.broken_listing.load(Ordering::SeqCst) {
            return Err(crate::Error::Database("disk I/O error".to_string()));
        }
        self.inner.get_all()
    }

    fn get_by_id(&self, local_id: LocalId) -> crate::Result<Option<Record>> {
        let record = self.inner.get_by_id(local_id)?;
        if *self.stalled_reader.lock().unwrap() == Some(std::thread::current().id()) {
            std::thread::sleep(Duration::from_millis(300));
        }
        Ok(record)
    }

    fn find_by_remote_key(&self, key: &RemoteKey) -> crate::Result<Option<Record>> {
        self.inner.find_by_remote_key(key)
    }

    fn insert(&self, record: &Record) -> crate::Result<Record> {
        self.inner.insert(record)
    }

    fn update(&self, record: &Record) -> crate::Result<()> {
        self.inner.update(record)
    }

    fn update_content(
        &self,
        local_id: LocalId,
        name: &str,
        details: &HabitDetails,
    ) -> crate::Result<Record> {
        self.inner.update_content(local_id, name, details)
    }

    fn overwrite_if_older(&self, record: &Record, remote_stamp: i64) -> crate::Result<bool> {
        self.inner.overwrite_if_older(record, remote_stamp)
    }

    fn mark_synced(&self, local_id: LocalId, key: &RemoteKey, synced_at: i64) -> crate::Result<()> {
        self.inner.mark_synced(local_id, key, synced_at)
    }

    fn soft_delete(&self, local_id: LocalId) -> crate::Result<Record> {
        self.inner.soft_delete(local_id)
    }

    fn restore(&self, local_id: LocalId) -> crate::Result<Record> {
        self.inner.restore(local_id)
    }

    fn hard_delete(&self, local_id: LocalId) -> crate::Result<bool> {
        self.inner.hard_delete(local_id)
    }

    fn enqueue(&self, entry: &NewQueueEntry) -> crate::Result<QueueEntry> {
        self.inner.enqueue(entry)
    }

    fn dequeue(&self, id: i64) -> crate::Result<bool> {
        self.inner.dequeue(id)
    }

    fn list_queue(&self) -> crate::Result<Vec<QueueEntry>> {
        self.inner.list_queue()
    }

    fn clear_queue(&self) -> crate::Result<usize> {
        self.inner.clear_queue()
    }

    fn queue_len(&self) -> crate::Result<usize> {
        self.inner.queue_len()
    }
}

fn flaky_context(
    store: &Arc<FlakyStore>,
    remote: &InMemoryRemoteStore,
) -> (SyncContext, Arc<SessionIdentity>) {
    let identity = Arc::new(SessionIdentity::new("device_test"));
    let ctx = SyncContext::new(
        store.clone(),
        Arc::new(remote.clone()),
        ConnectivityMonitor::new(true),
        identity.clone(),
    );
    (ctx, identity)
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_racing_key_assignment_keeps_one_document() {
    let store = Arc::new(FlakyStore::new());
    let remote = InMemoryRemoteStore::new();
    remote.set_latency(Duration::from_millis(50));
    let (ctx, identity) = flaky_context(&store, &remote);
    identity.sign_in(ACCOUNT);
    let repo = RecordRepository::new(ctx);

    let local_id = repo.insert(Record::new("Draft")).unwrap();
    let mut edited = store.inner.get_by_id(local_id).unwrap().unwrap();
    edited.name = "Final".to_string();

    // Any read this thread makes lands after the writer has stamped the key
    store.stall_reads_on_this_thread();
    repo.update(&edited).unwrap();
    repo.wait_for_remote_writes().await;

    let documents = remote.documents(ACCOUNT);
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].fields.name, "Final");
    assert_eq!(remote.calls().create, 1);

    let stored = store.inner.get_by_id(local_id).unwrap().unwrap();
    assert_eq!(stored.remote_key, Some(documents[0].key.clone()));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merge_check_restores_previous_identity() {
    let store = Arc::new(FlakyStore::new());
    let remote = InMemoryRemoteStore::new();
    let (ctx, identity) = flaky_context(&store, &remote);
    let coordinator = SyncCoordinator::new(ctx.clone());
    let resolver = ConflictResolver::new(ctx, coordinator.gate());
    store.break_listing();

    let result = complete_sign_in(&identity, &resolver, &coordinator, ACCOUNT, |_| {
        Some(MergeStrategy::MergeBoth)
    })
    .await;
    assert!(result.is_err());
    assert_eq!(identity.account(), None);

    identity.sign_in("bob");
    let result = complete_sign_in(&identity, &resolver, &coordinator, ACCOUNT, |_| None).await;
    assert!(result.is_err());
    assert_eq!(identity.account().as_deref(), Some("bob"));
    assert!(remote.documents(ACCOUNT).is_empty());
}
