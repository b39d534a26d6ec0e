//! Integration tests for sync agents and server.

use async_trait::async_trait;
use listsync_engine::{
    AgentConfig, ConnectionState, ItemPatch, LiveConnector, LiveStream, ReconnectPolicy, Replica,
    ReplicaEvent, SyncAgent, SyncError, SyncOutcome, SyncResult, SyncTransport,
};
use listsync_protocol::{
    Item, LiveMessage, PushEndpoint, RegisterPushRequest, SyncRequest, SyncResponse,
    WorkspaceInfo, INBOX_LIST_ID,
};
use listsync_server::{
    ConnectionId, LiveHub, ServerConfig, ServerError, SyncServer, LIVE_QUEUE_CAPACITY,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A transport that calls an in-memory server directly.
struct InProcessTransport {
    server: Arc<SyncServer>,
}

fn to_sync_error(err: ServerError) -> SyncError {
    if err.is_not_found() {
        SyncError::NotFound(err.to_string())
    } else {
        SyncError::Server {
            status: if err.is_client_error() { 400 } else { 500 },
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn create_workspace(&self) -> SyncResult<WorkspaceInfo> {
        self.server.create_workspace().await.map_err(to_sync_error)
    }

    async fn resolve_workspace(&self, code: &str) -> SyncResult<WorkspaceInfo> {
        self.server.resolve_workspace(code).map_err(to_sync_error)
    }

    async fn sync(&self, workspace_id: &str, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.server
            .sync(workspace_id, request.clone())
            .await
            .map_err(to_sync_error)
    }

    async fn register_push(
        &self,
        workspace_id: &str,
        request: &RegisterPushRequest,
    ) -> SyncResult<()> {
        self.server
            .register_push(workspace_id, request.clone())
            .await
            .map(|_| ())
            .map_err(to_sync_error)
    }
}

/// Live channels registered straight into the server's hub.
struct InProcessLive {
    server: Arc<SyncServer>,
}

/// Unregisters the connection when the stream is dropped.
struct Registration {
    hub: Arc<LiveHub>,
    workspace_id: String,
    connection: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(&self.workspace_id, self.connection);
    }
}

#[async_trait]
impl LiveConnector for InProcessLive {
    async fn connect(&self, workspace_id: &str, device_id: &str) -> SyncResult<LiveStream> {
        if !self.server.workspace_exists(workspace_id) {
            return Err(SyncError::NotFound(workspace_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(LIVE_QUEUE_CAPACITY);
        let hub = Arc::clone(self.server.hub());
        let connection = hub.register(workspace_id, Some(device_id.to_string()), tx);
        let registration = Registration {
            hub,
            workspace_id: workspace_id.to_string(),
            connection,
        };

        let stream = futures::stream::unfold((rx, registration), |(mut rx, registration)| {
            async move {
                let message = rx.recv().await?;
                Some((Ok(LiveMessage::clone(&message)), (rx, registration)))
            }
        });
        Ok(Box::pin(stream))
    }
}

fn server() -> Arc<SyncServer> {
    Arc::new(SyncServer::open(ServerConfig::default()).unwrap())
}

fn config(device_id: &str) -> AgentConfig {
    AgentConfig::new("memory://", device_id)
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(10)))
}

fn agent(server: &Arc<SyncServer>, device_id: &str) -> SyncAgent {
    agent_with(server, device_id, Replica::new())
}

fn agent_with(server: &Arc<SyncServer>, device_id: &str, replica: Replica) -> SyncAgent {
    SyncAgent::with_replica(
        config(device_id),
        Arc::new(InProcessTransport {
            server: Arc::clone(server),
        }),
        Arc::new(InProcessLive {
            server: Arc::clone(server),
        }),
        replica,
    )
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Waits until the agent's replica satisfies `condition`.
async fn wait_for_replica<F: Fn(&Replica) -> bool>(agent: &SyncAgent, condition: F) {
    for _ in 0..400 {
        if condition(&agent.snapshot().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("replica never reached the expected state");
}

/// Syncs until a round completes with nothing left to send.
async fn settle(agent: &SyncAgent) {
    for _ in 0..400 {
        if let Ok(SyncOutcome::Completed { .. }) = agent.sync().await {
            if agent.pending_changes().await == 0 {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("agent never settled");
}

async fn live_items(agent: &SyncAgent) -> Vec<Item> {
    agent.snapshot().await.live_items().cloned().collect()
}

#[tokio::test]
async fn second_device_pairs_by_code() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");

    let info = a.create_workspace().await.unwrap();
    let joined = b
        .join_workspace(&info.code.as_str().to_lowercase())
        .await
        .unwrap();
    assert_eq!(joined.id, info.id);

    let err = b.join_workspace("ZZZZZZZZ").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn edit_reaches_other_device() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");
    let info = a.create_workspace().await.unwrap();
    b.join_workspace(info.code.as_str()).await.unwrap();

    let item = a.add_item(INBOX_LIST_ID, "milk").await.unwrap();
    wait_for_replica(&b, |r| r.live_item(&item.id).is_some()).await;

    a.update_item(
        &item.id,
        ItemPatch {
            text: Some("milk, 2%".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    wait_for_replica(&b, |r| r.live_item(&item.id).is_some_and(|i| i.text == "milk, 2%")).await;
}

#[tokio::test]
async fn stale_local_copy_loses_to_server() {
    let server = server();
    let info = server.create_workspace().await.unwrap();

    let mut newer = Item::new("i1", INBOX_LIST_ID, "milk, 2%", 100);
    newer.updated_at = 200;
    server
        .sync(&info.id, SyncRequest::new("A", 0).with_items(vec![newer]))
        .await
        .unwrap();

    // B holds an unsynced copy from before A's edit.
    let mut replica = Replica::new();
    replica.put_item(Item::new("i1", INBOX_LIST_ID, "milk", 100));
    let b = agent_with(&server, "B", replica);

    b.join_workspace(info.code.as_str()).await.unwrap();
    settle(&b).await;

    let item = b.item("i1").await.unwrap();
    assert_eq!(item.text, "milk, 2%");
    assert_eq!(item.updated_at, 200);
    assert_eq!(server.directory().load(&info.id).unwrap().items["i1"].text, "milk, 2%");
}

#[tokio::test]
async fn offline_edits_converge() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");
    let info = a.create_workspace().await.unwrap();
    b.join_workspace(info.code.as_str()).await.unwrap();

    a.set_online(false).await;
    b.set_online(false).await;
    a.add_item(INBOX_LIST_ID, "bread").await.unwrap();
    a.add_item("shopping", "eggs").await.unwrap();
    b.add_item("todo", "call mum").await.unwrap();
    b.add_list("Garden", "leaf", "#22c55e").await.unwrap();
    assert_eq!(a.pending_changes().await, 2);
    assert_eq!(b.pending_changes().await, 2);

    b.set_online(true).await;
    a.set_online(true).await;
    settle(&b).await;
    settle(&a).await;
    settle(&b).await;

    let mut a_items = live_items(&a).await;
    let mut b_items = live_items(&b).await;
    a_items.sort_by(|x, y| x.id.cmp(&y.id));
    b_items.sort_by(|x, y| x.id.cmp(&y.id));
    assert_eq!(a_items.len(), 3);
    assert_eq!(a_items, b_items);
    assert_eq!(a.lists().await, b.lists().await);
    assert_eq!(a.lists().await.len(), 5);
}

#[tokio::test]
async fn deletion_propagates() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");
    let info = a.create_workspace().await.unwrap();
    b.join_workspace(info.code.as_str()).await.unwrap();

    let item = a.add_item(INBOX_LIST_ID, "milk").await.unwrap();
    wait_for_replica(&b, |r| r.live_item(&item.id).is_some()).await;

    a.delete_item(&item.id).await.unwrap();
    wait_for_replica(&b, |r| r.live_item(&item.id).is_none()).await;

    // The tombstone is kept, not the record dropped.
    let snapshot = b.snapshot().await;
    assert!(snapshot.item(&item.id).unwrap().deleted_at.is_some());
    assert!(b.items_in(INBOX_LIST_ID).await.is_empty());
}

#[tokio::test]
async fn deleted_list_moves_items_to_inbox_everywhere() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");
    let info = a.create_workspace().await.unwrap();
    b.join_workspace(info.code.as_str()).await.unwrap();

    let list = a.add_list("Garden", "leaf", "#22c55e").await.unwrap();
    let item = a.add_item(&list.id, "rake leaves").await.unwrap();
    wait_for_replica(&b, |r| r.live_item(&item.id).is_some()).await;

    a.delete_list(&list.id).await.unwrap();
    wait_for_replica(&b, |r| r.live_list(&list.id).is_none()).await;
    wait_for_replica(&b, |r| {
        r.live_item(&item.id)
            .is_some_and(|i| i.list_id == INBOX_LIST_ID)
    })
    .await;
}

#[tokio::test]
async fn live_channel_delivers_other_devices_changes() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");
    let info = a.create_workspace().await.unwrap();
    b.join_workspace(info.code.as_str()).await.unwrap();

    wait_until(|| b.connection_state() == ConnectionState::Connected).await;
    wait_until(|| a.connection_state() == ConnectionState::Connected).await;
    assert_eq!(server.hub().connection_count(&info.id), 2);
    settle(&a).await;
    settle(&b).await;

    let mut events = b.subscribe();
    let item = a.add_item(INBOX_LIST_ID, "milk").await.unwrap();

    let applied = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(ReplicaEvent::Live { applied }) => break applied,
                Ok(_) => continue,
                Err(e) => panic!("event channel: {e}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(applied.items.len(), 1);
    assert_eq!(applied.items[0].id, item.id);
}

#[tokio::test]
async fn leaving_closes_live_channel() {
    let server = server();
    let a = agent(&server, "A");
    let info = a.create_workspace().await.unwrap();
    wait_until(|| server.hub().connection_count(&info.id) == 1).await;

    a.leave_workspace().await;
    wait_until(|| server.hub().connection_count(&info.id) == 0).await;
    assert!(a.workspace().is_none());
}

#[tokio::test]
async fn push_endpoint_registered_on_join() {
    let server = server();
    let a = agent(&server, "A");
    let b = agent(&server, "B");
    b.register_push(PushEndpoint::new("https://push.example/b"))
        .await
        .unwrap();

    let info = a.create_workspace().await.unwrap();
    b.join_workspace(info.code.as_str()).await.unwrap();

    let record = server.directory().load(&info.id).unwrap();
    assert_eq!(record.subscriptions.len(), 1);
    assert_eq!(record.subscriptions[0].device_id, "B");
    assert_eq!(record.subscriptions[0].endpoint.endpoint, "https://push.example/b");
}

#[tokio::test]
async fn switching_workspace_carries_synced_records() {
    let server = server();
    let a = agent(&server, "A");
    let first = a.create_workspace().await.unwrap();
    let item = a.add_item(INBOX_LIST_ID, "milk").await.unwrap();
    settle(&a).await;
    assert_eq!(a.pending_changes().await, 0);

    let second = a.create_workspace().await.unwrap();
    assert_ne!(second.id, first.id);
    settle(&a).await;
    assert!(server.directory().load(&second.id).unwrap().items.contains_key(&item.id));

    let b = agent(&server, "B");
    b.join_workspace(second.code.as_str()).await.unwrap();
    settle(&b).await;
    let texts: Vec<_> = live_items(&b).await.into_iter().map(|i| i.text).collect();
    assert_eq!(texts, vec!["milk"]);
}

#[tokio::test]
async fn replica_snapshot_resumes_pending_work() {
    let server = server();
    let a = agent(&server, "A");
    let info = a.create_workspace().await.unwrap();
    a.set_online(false).await;
    let item = a.add_item(INBOX_LIST_ID, "milk").await.unwrap();

    // Restart the device from its saved replica.
    let saved = serde_json::to_string(&a.snapshot().await).unwrap();
    a.leave_workspace().await;
    let restored: Replica = serde_json::from_str(&saved).unwrap();
    let a = agent_with(&server, "A", restored);
    assert_eq!(a.pending_changes().await, 1);

    a.join_workspace(info.code.as_str()).await.unwrap();
    settle(&a).await;
    assert!(server.directory().load(&info.id).unwrap().items.contains_key(&item.id));
}

#[tokio::test]
async fn end_to_end_over_http_and_websocket() {
    let tmp = tempfile::tempdir().unwrap();
    let server = Arc::new(
        SyncServer::open(ServerConfig::default().with_data_dir(tmp.path())).unwrap(),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(listsync_server::http::serve_listener(
        listener,
        Arc::clone(&server),
        async {
            let _ = stopped.await;
        },
    ));

    let url = format!("http://{addr}");
    let reconnect = ReconnectPolicy::fixed(Duration::from_millis(20));
    let a =
        SyncAgent::connect(AgentConfig::new(&url, "A").with_reconnect(reconnect.clone())).unwrap();
    let b = SyncAgent::connect(AgentConfig::new(&url, "B").with_reconnect(reconnect)).unwrap();

    let info = a.create_workspace().await.unwrap();
    b.join_workspace(&info.code.as_str().to_lowercase())
        .await
        .unwrap();
    wait_until(|| b.connection_state() == ConnectionState::Connected).await;

    let item = a.add_item("shopping", "milk").await.unwrap();
    wait_for_replica(&b, |r| r.live_item(&item.id).is_some()).await;

    b.toggle_item(&item.id).await.unwrap();
    wait_for_replica(&a, |r| r.live_item(&item.id).is_some_and(|i| i.completed)).await;

    let stored = server.directory().load(&info.id).unwrap();
    assert!(stored.items[&item.id].completed);

    a.leave_workspace().await;
    b.leave_workspace().await;
    let _ = stop.send(());
    serving.await.unwrap().unwrap();
}
