use async_trait::async_trait;
use kursiyer::storage::{
    DocumentMap, DocumentStore, FeedDelivery, FeedListener, MemoryDocumentStore,
    SqliteDocumentStore, StoreError, StoreResult, SubscriberRegistry, Subscription,
};
use kursiyer::{AuthState, CoordinatorConfig, LocalAuthService, SyncCoordinator, ViewState};
use kursiyer_core::fees::FeeSchedule;
use kursiyer_core::notify::Severity;
use kursiyer_core::snapshot::SnapshotOrigin;
use kursiyer_core::{ClassKey, SyncError};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

fn schools_doc() -> Value {
    json!({
        "s1": { "name": "ÖZEL BİGA MERKEZ MTSK", "email": "merkez@example.com", "candidates": { "B": 5 } },
        "s2": { "name": "ÖZEL BİGA YILDIZ MTSK", "email": "yildiz@example.com", "candidates": { "A1": 2 } }
    })
}

fn seeded_store() -> Arc<MemoryDocumentStore> {
    let store = Arc::new(MemoryDocumentStore::new());
    store.seed("schools", schools_doc()).unwrap();
    store
}

async fn signed_in(store: Arc<dyn DocumentStore>, config: CoordinatorConfig) -> (SyncCoordinator, Arc<LocalAuthService>) {
    let auth = Arc::new(LocalAuthService::new());
    auth.sign_in("admin@example.com");
    let mut coordinator = SyncCoordinator::new(store, auth.clone(), config);
    coordinator.settle().await;
    (coordinator, auth)
}

/// Store double that controls when the initial fetch completes, what it returns, and whether
/// subscribing delivers the current value right away.
struct ScriptedStore {
    registry: Arc<SubscriberRegistry>,
    current: Mutex<DocumentMap>,
    deliver_on_subscribe: bool,
    fetch_gate: Semaphore,
    fetch_result: Mutex<Option<StoreResult<DocumentMap>>>,
}

impl ScriptedStore {
    fn new(current: DocumentMap, deliver_on_subscribe: bool, fetch_permits: usize) -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            current: Mutex::new(current),
            deliver_on_subscribe,
            fetch_gate: Semaphore::new(fetch_permits),
            fetch_result: Mutex::new(None),
        }
    }

    fn script_fetch(&self, result: StoreResult<DocumentMap>) {
        *self.fetch_result.lock().unwrap() = Some(result);
    }

    fn push(&self, documents: DocumentMap) {
        *self.current.lock().unwrap() = documents;
        self.registry
            .notify_changed("schools", |_| Ok(self.current.lock().unwrap().clone()));
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn fetch_all(&self, _path: &str) -> StoreResult<DocumentMap> {
        let _permit = self
            .fetch_gate
            .acquire()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match self.fetch_result.lock().unwrap().clone() {
            Some(result) => result,
            None => Ok(self.current.lock().unwrap().clone()),
        }
    }

    fn subscribe(&self, path: &str, listener: FeedListener) -> StoreResult<Subscription> {
        let subscription = self.registry.register(path, listener.clone())?;
        if self.deliver_on_subscribe {
            listener(FeedDelivery::Data(self.current.lock().unwrap().clone()));
        }
        Ok(subscription)
    }

    async fn write(&self, _path: &str, _document: Value) -> StoreResult<()> {
        Ok(())
    }

    async fn append(&self, _path: &str, _document: Value) -> StoreResult<String> {
        Err(StoreError::PermissionDenied("read only".into()))
    }
}

fn documents(value: Value) -> DocumentMap {
    value
        .as_object()
        .unwrap()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[tokio::test]
async fn six_decrements_from_five_stop_at_zero_with_six_writes() {
    let store = seeded_store();
    let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;

    for _ in 0..6 {
        coordinator
            .request_candidate_change("s1", ClassKey::B, -1)
            .unwrap();
    }
    let local = coordinator.snapshot();
    assert_eq!(local.get("s1").unwrap().candidates.count(ClassKey::B), 0);
    assert_eq!(coordinator.pending_writes(), 6);

    coordinator.settle().await;
    assert_eq!(store.write_attempts(), 6);
    assert_eq!(
        store.value_at("schools/s1/candidates/B").unwrap(),
        Some(json!(0))
    );
    let settled = coordinator.snapshot();
    assert_eq!(settled.get("s1").unwrap().candidates.count(ClassKey::B), 0);
}

#[tokio::test]
async fn session_totals_use_the_configured_schedule() {
    let store = Arc::new(MemoryDocumentStore::new());
    store
        .seed("schools/s1", json!({ "name": "Merkez", "email": "m@x", "candidates": { "B": 3, "A1": 2 } }))
        .unwrap();
    let config = CoordinatorConfig {
        fees: FeeSchedule::from_rates([(ClassKey::B, 1000), (ClassKey::A1, 800)]),
        ..CoordinatorConfig::default()
    };
    let (mut coordinator, _auth) = signed_in(store, config).await;
    coordinator.login("s1").unwrap();

    let totals = coordinator.session_totals().unwrap();
    assert_eq!(totals.total_count, 5);
    assert_eq!(totals.total_fee, 4600);
}

#[tokio::test]
async fn late_initial_fetch_is_superseded_by_the_feed() {
    let fresh = documents(json!({ "s1": { "name": "Merkez", "candidates": { "B": 7 } } }));
    let store = Arc::new(ScriptedStore::new(fresh, true, 0));
    store.script_fetch(Ok(documents(json!({ "s1": { "name": "Merkez", "candidates": { "B": 1 } } }))));

    let auth = Arc::new(LocalAuthService::new());
    auth.sign_in("admin@example.com");
    let mut coordinator = SyncCoordinator::new(store.clone(), auth, CoordinatorConfig::default());
    coordinator.drain();
    assert_eq!(coordinator.view(), ViewState::Ready);

    store.fetch_gate.add_permits(1);
    coordinator.settle().await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.origin, SnapshotOrigin::Feed);
    assert_eq!(snapshot.get("s1").unwrap().candidates.count(ClassKey::B), 7);
}

#[tokio::test]
async fn feed_error_before_the_initial_fetch_does_not_supersede_it() {
    let current = documents(json!({ "s1": { "name": "Merkez", "candidates": { "B": 4 } } }));
    let store = Arc::new(ScriptedStore::new(current, false, 0));

    let auth = Arc::new(LocalAuthService::new());
    auth.sign_in("admin@example.com");
    let mut coordinator = SyncCoordinator::new(store.clone(), auth, CoordinatorConfig::default());
    coordinator.drain();
    assert_eq!(coordinator.view(), ViewState::Loading);

    store
        .registry
        .notify_error("schools", StoreError::Transport("offline".into()));
    coordinator.drain();
    assert_eq!(coordinator.notifications().len(), 1);
    assert_eq!(coordinator.view(), ViewState::Loading);

    store.fetch_gate.add_permits(1);
    coordinator.settle().await;

    assert_eq!(coordinator.view(), ViewState::Ready);
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.origin, SnapshotOrigin::InitialFetch);
    assert_eq!(snapshot.get("s1").unwrap().candidates.count(ClassKey::B), 4);
}

#[tokio::test]
async fn failed_initial_load_blocks_until_reload() {
    let store = Arc::new(ScriptedStore::new(DocumentMap::new(), false, Semaphore::MAX_PERMITS));
    store.script_fetch(Err(StoreError::Transport("offline".into())));

    let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
    assert_eq!(
        coordinator.view(),
        ViewState::Failed {
            message: SyncError::Fetch(String::new()).user_message().to_string()
        }
    );

    store.push(documents(json!({ "s1": { "name": "Merkez" } })));
    coordinator.drain();
    assert!(coordinator.snapshot().contains("s1"));
    assert!(matches!(coordinator.view(), ViewState::Failed { .. }));

    *store.fetch_result.lock().unwrap() = None;
    coordinator.reload();
    coordinator.settle().await;
    assert_eq!(coordinator.view(), ViewState::Ready);
    assert_eq!(coordinator.snapshot().origin, SnapshotOrigin::InitialFetch);
}

#[tokio::test]
async fn feed_errors_keep_the_snapshot_and_notify() {
    let store = seeded_store();
    let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
    let before = coordinator.snapshot();

    store.inject_feed_error("schools", StoreError::PermissionDenied("rules".into()));
    coordinator.drain();

    let after = coordinator.snapshot();
    assert_eq!(after.seq, before.seq);
    assert_eq!(after.len(), 2);
    assert_eq!(coordinator.view(), ViewState::Ready);

    let notes = coordinator.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Error);
    assert_eq!(
        notes[0].message,
        "Veri güncellenirken bir hata oluştu. Lütfen sayfayı yenileyin."
    );
    assert!(coordinator.dismiss(notes[0].id));
    assert!(coordinator.notifications().is_empty());
}

#[tokio::test]
async fn failed_writes_are_not_rolled_back() {
    let store = seeded_store();
    let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
    store.fail_writes(true);

    coordinator
        .request_candidate_change("s2", ClassKey::A1, 1)
        .unwrap();
    coordinator.settle().await;

    let local = coordinator.snapshot();
    assert_eq!(local.get("s2").unwrap().candidates.count(ClassKey::A1), 3);
    assert_eq!(
        store.value_at("schools/s2/candidates/A1").unwrap(),
        Some(json!(2))
    );
    assert_eq!(coordinator.consecutive_write_failures(), 1);
    assert_eq!(coordinator.notifications().len(), 1);
}

#[tokio::test]
async fn unknown_school_is_rejected_without_a_write() {
    let store = seeded_store();
    let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
    let seq = coordinator.snapshot().seq;

    let err = coordinator
        .request_candidate_change("ghost", ClassKey::B, 1)
        .unwrap_err();
    assert_eq!(err, SyncError::SchoolNotFound("ghost".into()));
    coordinator.settle().await;
    assert_eq!(coordinator.snapshot().seq, seq);
    assert_eq!(store.write_attempts(), 0);
}

#[tokio::test]
async fn session_follows_its_school_and_survives_its_removal() {
    let store = seeded_store();
    let (mut coordinator, auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
    coordinator.login("s1").unwrap();

    store.seed("schools/s1/candidates", json!({ "B": 9 })).unwrap();
    coordinator.drain();
    let session = coordinator.session().unwrap();
    assert_eq!(session.candidates.count(ClassKey::B), 9);

    store.seed("schools/s1", Value::Null).unwrap();
    coordinator.drain();
    assert!(!coordinator.snapshot().contains("s1"));
    let kept = coordinator.session().unwrap();
    assert_eq!(kept.id, "s1");
    assert_eq!(kept.candidates.count(ClassKey::B), 9);

    coordinator.logout();
    coordinator.drain();
    assert!(coordinator.session().is_none());
    assert_eq!(auth.current(), AuthState::SignedOut);
    assert!(coordinator.snapshot().is_empty());
    assert_eq!(coordinator.snapshot().origin, SnapshotOrigin::Cleared);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn login_selection_is_validated() {
    let store = seeded_store();
    let (mut coordinator, _auth) = signed_in(store, CoordinatorConfig::default()).await;

    assert_eq!(coordinator.login(""), Err(SyncError::NoSchoolSelected));
    assert_eq!(
        coordinator.login("s9"),
        Err(SyncError::SchoolNotFound("s9".into()))
    );
    let messages: Vec<_> = coordinator
        .notifications()
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert_eq!(
        messages,
        vec!["Lütfen bir sürücü kursu seçin", "Geçersiz sürücü kursu seçimi"]
    );
    assert!(coordinator.session().is_none());
}

#[tokio::test]
async fn signing_in_again_discards_the_old_session_feed() {
    let store = seeded_store();
    let (mut coordinator, auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
    auth.sign_in("other@example.com");
    coordinator.settle().await;
    assert_eq!(store.subscriber_count(), 1);
    assert_eq!(coordinator.snapshot().len(), 2);
}

#[tokio::test]
async fn commands_flow_through_the_running_loop() {
    let store = seeded_store();
    let auth = Arc::new(LocalAuthService::new());
    auth.sign_in("admin@example.com");
    let coordinator = SyncCoordinator::new(store.clone(), auth, CoordinatorConfig::default());
    let handle = coordinator.handle();
    let mut session_rx = coordinator.watch_session();
    let mut snapshot_rx = coordinator.watch_snapshot();
    let task = tokio::spawn(coordinator.run());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !snapshot_rx.borrow_and_update().contains("s1") {
            snapshot_rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert!(handle.login("s1"));
    assert!(handle.change_candidates("s1", ClassKey::B, 2));
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            session_rx.changed().await.unwrap();
            let count = session_rx
                .borrow_and_update()
                .as_ref()
                .map(|s| s.candidates.count(ClassKey::B));
            if count == Some(7) {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert!(handle.shutdown());
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn candidate_changes_persist_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kursiyer.sqlite3");
    {
        let store = Arc::new(SqliteDocumentStore::open(&db_path).unwrap());
        store.write("schools", schools_doc()).await.unwrap();
        let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;
        coordinator
            .request_candidate_change("s2", ClassKey::FarkA2, 3)
            .unwrap();
        coordinator.settle().await;
        assert_eq!(store.metrics().writes_attempted, 2);
    }

    let reopened = Arc::new(SqliteDocumentStore::open(&db_path).unwrap());
    let (coordinator, _auth) = signed_in(reopened, CoordinatorConfig::default()).await;
    let snapshot = coordinator.snapshot();
    let s2 = snapshot.get("s2").unwrap();
    assert_eq!(s2.candidates.count(ClassKey::FarkA2), 3);
    assert_eq!(s2.candidates.count(ClassKey::A1), 2);
    assert_eq!(s2.name, "ÖZEL BİGA YILDIZ MTSK");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_increments_reach_sqlite_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteDocumentStore::open(dir.path().join("kursiyer.sqlite3")).unwrap());
    store
        .write("schools", json!({ "s1": { "name": "Merkez", "email": "m@x", "candidates": { "B": 0 } } }))
        .await
        .unwrap();
    let (mut coordinator, _auth) = signed_in(store.clone(), CoordinatorConfig::default()).await;

    for round in 1..=3i64 {
        for _ in 0..20 {
            coordinator
                .request_candidate_change("s1", ClassKey::B, 1)
                .unwrap();
        }
        coordinator.settle().await;

        let stored = store.fetch_all("schools/s1/candidates").await.unwrap();
        assert_eq!(stored["B"], json!(20 * round), "stored count after round {round}");
        let local = coordinator.snapshot();
        assert_eq!(
            local.get("s1").unwrap().candidates.count(ClassKey::B),
            (20 * round) as u64,
            "local count after round {round}"
        );
    }
    assert_eq!(coordinator.consecutive_write_failures(), 0);
}
