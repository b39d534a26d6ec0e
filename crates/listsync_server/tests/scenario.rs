//! End-to-end merge scenarios against the server facade.

use async_trait::async_trait;
use listsync_protocol::{
    ChangeSet, Clock, Item, MonotonicClock, NotificationPayload, PushEndpoint, PushSubscription,
    RegisterPushRequest, SyncRequest, Timestamp, WorkspaceCode, WorkspaceRecord,
};
use listsync_server::{
    DeliveryError, PushDelivery, ServerConfig, SyncServer, WorkspaceDirectory,
};
use listsync_store::{FileStore, InMemoryStore, WorkspaceStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const WORKSPACE_ID: &str = "3f0c6a52-9a7e-4d51-8f7e-5b7f3c2d1e0a";

/// Delivery that answers "gone" for one endpoint and records the rest.
#[derive(Default)]
struct ScriptedDelivery {
    gone: Mutex<Vec<String>>,
    attempts: Mutex<Vec<String>>,
}

#[async_trait]
impl PushDelivery for ScriptedDelivery {
    async fn deliver(
        &self,
        endpoint: &PushEndpoint,
        _payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        self.attempts.lock().push(endpoint.endpoint.clone());
        if self.gone.lock().contains(&endpoint.endpoint) {
            Err(DeliveryError::Gone { status: 410 })
        } else {
            Ok(())
        }
    }
}

fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let code = WorkspaceCode::parse("K7M3P9QZ").unwrap();
    store
        .save(&WorkspaceRecord::new(WORKSPACE_ID, code, 1))
        .unwrap();
    store
}

/// Wall clock stuck at one instant; the monotonic wrapper still ticks.
struct Pinned(Timestamp);

impl Clock for Pinned {
    fn now(&self) -> Timestamp {
        self.0
    }
}

fn server_with(store: Arc<dyn WorkspaceStore>, delivery: Arc<dyn PushDelivery>) -> SyncServer {
    // Server stamps start at 150 so the hand-written updatedAt values below
    // straddle them.
    SyncServer::with_clock(
        ServerConfig::default(),
        store,
        delivery,
        Arc::new(MonotonicClock::with_source(Pinned(150))),
    )
    .unwrap()
}

fn milk(text: &str, updated_at: i64) -> Item {
    let mut item = Item::new("i1", "inbox", text, 100);
    item.updated_at = updated_at;
    item
}

#[tokio::test]
async fn two_devices_converge_on_newest_text() {
    let server = server_with(seeded_store(), Arc::new(ScriptedDelivery::default()));
    let ws = server.resolve_workspace("k7m3p9qz").unwrap();
    assert_eq!(ws.id, WORKSPACE_ID);

    // Device A adds the item.
    let a1 = server
        .sync(&ws.id, SyncRequest::new("A", 0).with_items(vec![milk("milk", 100)]))
        .await
        .unwrap();
    assert_eq!(a1.items, vec![milk("milk", 100)]);

    // Device B catches up from scratch.
    let b1 = server.sync(&ws.id, SyncRequest::new("B", 0)).await.unwrap();
    assert_eq!(b1.items, vec![milk("milk", 100)]);
    let t1 = b1.synced_at;
    assert!(t1 < 200);

    // Device A edits.
    server
        .sync(
            &ws.id,
            SyncRequest::new("A", a1.synced_at).with_items(vec![milk("milk, 2%", 200)]),
        )
        .await
        .unwrap();

    // B still holds the stale copy and sends it along; it gets the new one back.
    let b2 = server
        .sync(&ws.id, SyncRequest::new("B", t1).with_items(vec![milk("milk", 100)]))
        .await
        .unwrap();
    assert_eq!(b2.items.len(), 1);
    assert_eq!(b2.items[0].text, "milk, 2%");
    assert_eq!(b2.items[0].updated_at, 200);
    assert!(b2.synced_at > t1);
}

#[tokio::test]
async fn tombstone_reaches_other_device() {
    let server = server_with(seeded_store(), Arc::new(ScriptedDelivery::default()));
    server
        .sync(WORKSPACE_ID, SyncRequest::new("A", 0).with_items(vec![milk("milk", 100)]))
        .await
        .unwrap();
    let b = server.sync(WORKSPACE_ID, SyncRequest::new("B", 0)).await.unwrap();

    let mut gone = milk("milk", 300);
    gone.deleted_at = Some(300);
    server
        .sync(WORKSPACE_ID, SyncRequest::new("A", 0).with_items(vec![gone]))
        .await
        .unwrap();

    let b2 = server
        .sync(WORKSPACE_ID, SyncRequest::new("B", b.synced_at))
        .await
        .unwrap();
    assert_eq!(b2.items[0].deleted_at, Some(300));
}

#[tokio::test]
async fn retransmitted_batch_leaves_document_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(tmp.path()).unwrap());
    let server = server_with(
        Arc::clone(&store) as Arc<dyn WorkspaceStore>,
        Arc::new(ScriptedDelivery::default()),
    );
    let ws = server.create_workspace().await.unwrap();

    let batch = SyncRequest::new("A", 0).with_items(vec![milk("milk", 100)]);
    server.sync(&ws.id, batch.clone()).await.unwrap();
    let path = store.document_path(&ws.id).unwrap();
    let before = std::fs::read(&path).unwrap();

    server.sync(&ws.id, batch).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn gone_endpoint_heals_and_is_not_retried() {
    let delivery = Arc::new(ScriptedDelivery::default());
    delivery.gone.lock().push("https://push/b".into());
    let store = seeded_store();
    let server = server_with(
        Arc::clone(&store) as Arc<dyn WorkspaceStore>,
        Arc::clone(&delivery) as Arc<dyn PushDelivery>,
    );

    for (device, url) in [("A", "https://push/a"), ("B", "https://push/b")] {
        server
            .register_push(
                WORKSPACE_ID,
                RegisterPushRequest {
                    device_id: device.into(),
                    subscription: PushEndpoint::new(url),
                },
            )
            .await
            .unwrap();
    }

    let changes = ChangeSet {
        lists: vec![],
        items: vec![milk("milk", 100)],
    };
    let report = server
        .notifier()
        .notify(WORKSPACE_ID, "C", &changes)
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.removed, 1);

    let subscriptions: Vec<PushSubscription> =
        store.load(WORKSPACE_ID).unwrap().unwrap().subscriptions;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].device_id, "A");

    delivery.attempts.lock().clear();
    server
        .notifier()
        .notify(WORKSPACE_ID, "C", &changes)
        .await
        .unwrap();
    assert_eq!(*delivery.attempts.lock(), vec!["https://push/a".to_string()]);
}

#[tokio::test]
async fn sync_triggers_background_notification() {
    let delivery = Arc::new(ScriptedDelivery::default());
    let server = server_with(seeded_store(), Arc::clone(&delivery) as Arc<dyn PushDelivery>);
    server
        .register_push(
            WORKSPACE_ID,
            RegisterPushRequest {
                device_id: "B".into(),
                subscription: PushEndpoint::new("https://push/b"),
            },
        )
        .await
        .unwrap();

    server
        .sync(WORKSPACE_ID, SyncRequest::new("A", 0).with_items(vec![milk("milk", 100)]))
        .await
        .unwrap();

    for _ in 0..100 {
        if !delivery.attempts.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*delivery.attempts.lock(), vec!["https://push/b".to_string()]);
}

#[test]
fn directory_sees_seeded_code() {
    let directory =
        WorkspaceDirectory::open(seeded_store(), Arc::new(MonotonicClock::new())).unwrap();
    assert_eq!(directory.resolve("K7M3P9QZ").unwrap().id, WORKSPACE_ID);
}
