//! Sync agent state machine.

use crate::config::AgentConfig;
use crate::error::{SyncError, SyncResult};
use crate::http::{HttpTransport, WsConnector};
use crate::replica::Replica;
use crate::transport::{LiveConnector, SyncTransport};
use futures::StreamExt;
use listsync_protocol::{
    is_builtin_list, ChangeSet, Clock, Item, List, LiveMessage, MonotonicClock, PushEndpoint,
    RegisterPushRequest, Timestamp, WorkspaceInfo, INBOX_LIST_ID,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the change event channel. Slow subscribers skip events.
const EVENT_CAPACITY: usize = 64;

/// State of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live channel.
    Disconnected,
    /// Opening the live channel.
    Connecting,
    /// Receiving live changes.
    Connected,
}

/// Notification that the replica changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    /// A sync round finished; `applied` holds the remote records that won.
    Synced {
        /// Remote records applied.
        applied: ChangeSet,
        /// New watermark.
        synced_at: Timestamp,
    },
    /// Changes arrived on the live channel.
    Live {
        /// Remote records applied.
        applied: ChangeSet,
    },
    /// A local mutation was made.
    Local,
    /// The live channel changed state.
    Connection(ConnectionState),
}

/// Why a sync request was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another sync is in flight.
    InFlight,
    /// The device is offline.
    Offline,
    /// No workspace is joined.
    NotJoined,
}

/// Result of [`SyncAgent::sync`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Nothing was sent.
    Skipped(SkipReason),
    /// The round completed.
    Completed {
        /// Records sent.
        sent: usize,
        /// Remote records applied.
        applied: usize,
        /// New watermark.
        synced_at: Timestamp,
    },
}

/// Statistics about sync rounds.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Rounds that completed.
    pub syncs_completed: u64,
    /// Rounds that failed.
    pub syncs_failed: u64,
    /// Records sent in completed rounds.
    pub records_sent: u64,
    /// Remote records applied, from sync responses and live messages.
    pub records_applied: u64,
    /// Live connections opened.
    pub live_connects: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Changes to an item. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    /// New text.
    pub text: Option<String>,
    /// New completion state.
    pub completed: Option<bool>,
    /// New owning list.
    pub list_id: Option<String>,
}

/// Changes to a list. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPatch {
    /// New name.
    pub name: Option<String>,
    /// New icon.
    pub icon: Option<String>,
    /// New color.
    pub color: Option<String>,
    /// New position.
    pub order: Option<i32>,
    /// New description.
    pub description: Option<String>,
}

/// Keeps one device's replica in sync with a workspace.
///
/// The agent:
/// - applies local mutations immediately and sends them in the background
/// - runs at most one sync round at a time
/// - holds a live channel open while joined, reconnecting with backoff
/// - applies remote records with last-write-wins, whether they come from a
///   sync response or the live channel
///
/// Cloning is cheap; clones share the same agent.
#[derive(Clone)]
pub struct SyncAgent {
    inner: Arc<Inner>,
}

struct Inner {
    config: AgentConfig,
    transport: Arc<dyn SyncTransport>,
    connector: Arc<dyn LiveConnector>,
    clock: MonotonicClock,
    replica: tokio::sync::Mutex<Replica>,
    workspace: RwLock<Option<WorkspaceInfo>>,
    push_endpoint: RwLock<Option<PushEndpoint>>,
    online: AtomicBool,
    syncing: AtomicBool,
    connection: RwLock<ConnectionState>,
    live_task: Mutex<Option<JoinHandle<()>>>,
    stats: RwLock<SyncStats>,
    events: broadcast::Sender<ReplicaEvent>,
}

/// Clears the in-flight flag when a sync round ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncAgent {
    /// Creates an agent over explicit transports with a fresh replica.
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn SyncTransport>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        Self::with_replica(config, transport, connector, Replica::new())
    }

    /// Creates an agent resuming from a saved replica.
    pub fn with_replica(
        config: AgentConfig,
        transport: Arc<dyn SyncTransport>,
        connector: Arc<dyn LiveConnector>,
        replica: Replica,
    ) -> Self {
        let clock = MonotonicClock::new();
        if let Some(newest) = replica.newest_stamp() {
            clock.observe(newest);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                connector,
                clock,
                replica: tokio::sync::Mutex::new(replica),
                workspace: RwLock::new(None),
                push_endpoint: RwLock::new(None),
                online: AtomicBool::new(true),
                syncing: AtomicBool::new(false),
                connection: RwLock::new(ConnectionState::Disconnected),
                live_task: Mutex::new(None),
                stats: RwLock::new(SyncStats::default()),
                events,
            }),
        }
    }

    /// Creates an agent talking HTTP and WebSocket to `config.server_url`.
    pub fn connect(config: AgentConfig) -> SyncResult<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let connector = Arc::new(WsConnector::new(config.clone()));
        Ok(Self::new(config, transport, connector))
    }

    /// Returns the device id.
    pub fn device_id(&self) -> &str {
        &self.inner.config.device_id
    }

    /// Returns the joined workspace.
    pub fn workspace(&self) -> Option<WorkspaceInfo> {
        self.inner.workspace.read().clone()
    }

    /// Returns the live channel state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.read()
    }

    /// Returns true if the device is considered online.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Returns true while a sync round is in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Subscribes to replica change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a copy of the replica, e.g. to persist it.
    pub async fn snapshot(&self) -> Replica {
        self.inner.replica.lock().await.clone()
    }

    /// Returns the watermark.
    pub async fn last_sync_at(&self) -> Timestamp {
        self.inner.replica.lock().await.last_sync_at()
    }

    /// Number of local changes not yet acknowledged by the server.
    pub async fn pending_changes(&self) -> usize {
        self.inner.replica.lock().await.pending_count()
    }

    // Workspace lifecycle

    /// Creates a workspace on the server and joins it.
    pub async fn create_workspace(&self) -> SyncResult<WorkspaceInfo> {
        let info = self.inner.transport.create_workspace().await?;
        info!(workspace_id = %info.id, code = %info.code, "workspace created");
        self.join(info.clone()).await;
        Ok(info)
    }

    /// Joins the workspace behind `code` (case-insensitive).
    ///
    /// Resolves the code, opens the live channel, runs a first sync and
    /// registers the push endpoint if one is set. Only a failed resolve is
    /// an error; the rest is retried later on its own.
    pub async fn join_workspace(&self, code: &str) -> SyncResult<WorkspaceInfo> {
        let info = self.inner.transport.resolve_workspace(code).await?;
        info!(workspace_id = %info.id, code = %info.code, "joining workspace");
        self.join(info.clone()).await;
        Ok(info)
    }

    async fn join(&self, info: WorkspaceInfo) {
        self.stop_live();
        {
            // The new workspace has none of our records yet.
            let mut replica = self.inner.replica.lock().await;
            replica.reset_watermark();
            replica.mark_all_dirty();
        }
        *self.inner.workspace.write() = Some(info.clone());

        let task = tokio::spawn(Inner::run_live(Arc::clone(&self.inner), info.id.clone()));
        *self.inner.live_task.lock() = Some(task);

        if let Err(e) = self.sync().await {
            warn!(workspace_id = %info.id, error = %e, "initial sync failed");
        }
        if let Err(e) = self.register_current_push().await {
            warn!(workspace_id = %info.id, error = %e, "push registration failed");
        }
    }

    /// Leaves the workspace: closes the live channel and resets the replica.
    pub async fn leave_workspace(&self) {
        let left = self.inner.workspace.write().take();
        self.stop_live();
        *self.inner.replica.lock().await = Replica::new();
        self.inner.set_connection(ConnectionState::Disconnected);
        if let Some(info) = left {
            info!(workspace_id = %info.id, "left workspace");
        }
    }

    fn stop_live(&self) {
        if let Some(task) = self.inner.live_task.lock().take() {
            task.abort();
        }
    }

    /// Marks the device online or offline. Coming online triggers a sync.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            debug!("back online");
            if let Err(e) = self.sync().await {
                warn!(error = %e, "sync after reconnect failed");
            }
        }
    }

    /// Sets this device's push endpoint and registers it if joined.
    pub async fn register_push(&self, endpoint: PushEndpoint) -> SyncResult<()> {
        *self.inner.push_endpoint.write() = Some(endpoint);
        self.register_current_push().await
    }

    async fn register_current_push(&self) -> SyncResult<()> {
        let Some(endpoint) = self.inner.push_endpoint.read().clone() else {
            return Ok(());
        };
        let Some(workspace) = self.workspace() else {
            return Ok(());
        };
        let request = RegisterPushRequest {
            device_id: self.device_id().to_string(),
            subscription: endpoint,
        };
        self.inner
            .transport
            .register_push(&workspace.id, &request)
            .await?;
        debug!(workspace_id = %workspace.id, "push endpoint registered");
        Ok(())
    }

    /// Runs one sync round.
    ///
    /// Skipped when a round is already in flight, when offline, or when no
    /// workspace is joined. On failure nothing changes locally: the dirty
    /// records and the watermark stay as they were.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        self.inner.sync().await
    }

    // Mutations

    /// Adds an item to a list.
    pub async fn add_item(&self, list_id: &str, text: &str) -> SyncResult<Item> {
        let item = Item::new(
            Uuid::new_v4().to_string(),
            list_id,
            text,
            self.inner.clock.now(),
        );
        self.inner.replica.lock().await.put_item(item.clone());
        self.inner.after_local_change();
        Ok(item)
    }

    /// Updates an item.
    pub async fn update_item(&self, id: &str, patch: ItemPatch) -> SyncResult<Item> {
        let mut replica = self.inner.replica.lock().await;
        let mut item = replica
            .live_item(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownRecord(id.to_string()))?;

        if let Some(text) = patch.text {
            item.text = text;
        }
        if let Some(completed) = patch.completed {
            item.completed = completed;
        }
        if let Some(list_id) = patch.list_id {
            item.list_id = list_id;
        }
        item.updated_at = self.inner.stamp_after(item.updated_at);

        replica.put_item(item.clone());
        drop(replica);
        self.inner.after_local_change();
        Ok(item)
    }

    /// Flips an item's completion state.
    pub async fn toggle_item(&self, id: &str) -> SyncResult<Item> {
        let completed = {
            let replica = self.inner.replica.lock().await;
            replica
                .live_item(id)
                .map(|i| i.completed)
                .ok_or_else(|| SyncError::UnknownRecord(id.to_string()))?
        };
        self.update_item(
            id,
            ItemPatch {
                completed: Some(!completed),
                ..ItemPatch::default()
            },
        )
        .await
    }

    /// Moves an item to another list.
    pub async fn move_item(&self, id: &str, list_id: &str) -> SyncResult<Item> {
        self.update_item(
            id,
            ItemPatch {
                list_id: Some(list_id.to_string()),
                ..ItemPatch::default()
            },
        )
        .await
    }

    /// Deletes an item, leaving a tombstone that propagates.
    pub async fn delete_item(&self, id: &str) -> SyncResult<()> {
        let mut replica = self.inner.replica.lock().await;
        let mut item = replica
            .live_item(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownRecord(id.to_string()))?;
        let now = self.inner.stamp_after(item.updated_at);
        item.updated_at = now;
        item.deleted_at = Some(now);
        replica.put_item(item);
        drop(replica);
        self.inner.after_local_change();
        Ok(())
    }

    /// Deletes every completed item of a list. Returns how many.
    pub async fn clear_completed(&self, list_id: &str) -> SyncResult<usize> {
        let mut replica = self.inner.replica.lock().await;
        let completed: Vec<Item> = replica
            .live_items()
            .filter(|i| i.list_id == list_id && i.completed)
            .cloned()
            .collect();
        for mut item in completed.iter().cloned() {
            let now = self.inner.stamp_after(item.updated_at);
            item.updated_at = now;
            item.deleted_at = Some(now);
            replica.put_item(item);
        }
        drop(replica);

        if !completed.is_empty() {
            self.inner.after_local_change();
        }
        Ok(completed.len())
    }

    /// Adds a list at the end.
    pub async fn add_list(&self, name: &str, icon: &str, color: &str) -> SyncResult<List> {
        let mut replica = self.inner.replica.lock().await;
        let order = replica
            .lists()
            .iter()
            .map(|l| l.order + 1)
            .max()
            .unwrap_or(0);
        let list = List::new(
            Uuid::new_v4().to_string(),
            name,
            icon,
            color,
            order,
            self.inner.clock.now(),
        );
        replica.put_list(list.clone());
        drop(replica);
        self.inner.after_local_change();
        Ok(list)
    }

    /// Updates a list.
    pub async fn update_list(&self, id: &str, patch: ListPatch) -> SyncResult<List> {
        let mut replica = self.inner.replica.lock().await;
        let mut list = replica
            .live_list(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownRecord(id.to_string()))?;

        if let Some(name) = patch.name {
            list.name = name;
        }
        if let Some(icon) = patch.icon {
            list.icon = icon;
        }
        if let Some(color) = patch.color {
            list.color = color;
        }
        if let Some(order) = patch.order {
            list.order = order;
        }
        if let Some(description) = patch.description {
            list.description = Some(description);
        }
        list.updated_at = self.inner.stamp_after(list.updated_at);

        replica.put_list(list.clone());
        drop(replica);
        self.inner.after_local_change();
        Ok(list)
    }

    /// Deletes a list. Its items move to the inbox.
    ///
    /// Built-in lists cannot be deleted.
    pub async fn delete_list(&self, id: &str) -> SyncResult<()> {
        if is_builtin_list(id) {
            return Err(SyncError::BuiltinList(id.to_string()));
        }

        let mut replica = self.inner.replica.lock().await;
        let mut list = replica
            .live_list(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownRecord(id.to_string()))?;

        let orphans: Vec<Item> = replica
            .live_items()
            .filter(|i| i.list_id == id)
            .cloned()
            .collect();
        for mut item in orphans {
            item.list_id = INBOX_LIST_ID.to_string();
            item.updated_at = self.inner.stamp_after(item.updated_at);
            replica.put_item(item);
        }

        let now = self.inner.stamp_after(list.updated_at);
        list.updated_at = now;
        list.deleted_at = Some(now);
        replica.put_list(list);
        drop(replica);

        self.inner.after_local_change();
        Ok(())
    }

    // Reads

    /// Live lists sorted by order.
    pub async fn lists(&self) -> Vec<List> {
        self.inner.replica.lock().await.lists()
    }

    /// Live items of a list: incomplete first, then newest first.
    pub async fn items_in(&self, list_id: &str) -> Vec<Item> {
        self.inner.replica.lock().await.items_in(list_id)
    }

    /// Returns a live item.
    pub async fn item(&self, id: &str) -> Option<Item> {
        self.inner.replica.lock().await.live_item(id).cloned()
    }

    /// Returns a live list.
    pub async fn list(&self, id: &str) -> Option<List> {
        self.inner.replica.lock().await.live_list(id).cloned()
    }
}

impl Inner {
    fn emit(&self, event: ReplicaEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn set_connection(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.connection.write(), state);
        if previous != state {
            self.emit(ReplicaEvent::Connection(state));
        }
    }

    fn is_joined_to(&self, workspace_id: &str) -> bool {
        self.workspace
            .read()
            .as_ref()
            .is_some_and(|w| w.id == workspace_id)
    }

    /// A stamp strictly newer than `previous` and than anything stamped so far.
    fn stamp_after(&self, previous: Timestamp) -> Timestamp {
        self.clock.observe(previous);
        self.clock.now()
    }

    fn after_local_change(self: &Arc<Self>) {
        self.emit(ReplicaEvent::Local);
        self.spawn_sync();
    }

    fn spawn_sync(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.sync().await {
                debug!(error = %e, "background sync failed");
            }
        });
    }

    async fn sync(&self) -> SyncResult<SyncOutcome> {
        let Some(workspace) = self.workspace.read().clone() else {
            return Ok(SyncOutcome::Skipped(SkipReason::NotJoined));
        };
        if !self.online.load(Ordering::SeqCst) {
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(SyncOutcome::Skipped(SkipReason::InFlight));
        }
        let _in_flight = InFlight(&self.syncing);

        let request = self
            .replica
            .lock()
            .await
            .pending_request(&self.config.device_id);
        let sent = request.lists.len() + request.items.len();

        let response = match self.transport.sync(&workspace.id, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(workspace_id = %workspace.id, error = %e, "sync failed");
                let mut stats = self.stats.write();
                stats.syncs_failed += 1;
                stats.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut replica = self.replica.lock().await;
        if !self.is_joined_to(&workspace.id) {
            debug!(workspace_id = %workspace.id, "workspace left during sync; dropping response");
            return Ok(SyncOutcome::Skipped(SkipReason::NotJoined));
        }
        let synced_at = response.synced_at;
        let applied = replica.complete_sync(&request, response);
        if let Some(newest) = replica.newest_stamp() {
            self.clock.observe(newest);
        }
        drop(replica);

        {
            let mut stats = self.stats.write();
            stats.syncs_completed += 1;
            stats.records_sent += sent as u64;
            stats.records_applied += applied.len() as u64;
            stats.last_error = None;
        }
        debug!(
            workspace_id = %workspace.id,
            sent,
            applied = applied.len(),
            synced_at,
            "sync complete"
        );

        let outcome = SyncOutcome::Completed {
            sent,
            applied: applied.len(),
            synced_at,
        };
        self.emit(ReplicaEvent::Synced { applied, synced_at });
        Ok(outcome)
    }

    async fn apply_live(&self, workspace_id: &str, changes: ChangeSet) {
        let mut replica = self.replica.lock().await;
        if !self.is_joined_to(workspace_id) {
            return;
        }
        let applied = replica.apply_remote(changes.lists, changes.items);
        if let Some(newest) = replica.newest_stamp() {
            self.clock.observe(newest);
        }
        drop(replica);

        debug!(workspace_id, applied = applied.len(), "applied live changes");
        self.stats.write().records_applied += applied.len() as u64;
        self.emit(ReplicaEvent::Live { applied });
    }

    /// Keeps the live channel open while `workspace_id` stays joined.
    async fn run_live(self: Arc<Self>, workspace_id: String) {
        let mut attempt = 0;
        while self.is_joined_to(&workspace_id) {
            self.set_connection(ConnectionState::Connecting);
            match self
                .connector
                .connect(&workspace_id, &self.config.device_id)
                .await
            {
                Ok(mut stream) => {
                    self.set_connection(ConnectionState::Connected);
                    self.stats.write().live_connects += 1;
                    attempt = 0;
                    // Catch up on whatever was missed while disconnected.
                    self.spawn_sync();

                    while let Some(message) = stream.next().await {
                        match message {
                            Ok(LiveMessage::Sync { changes }) => {
                                self.apply_live(&workspace_id, changes).await;
                            }
                            Err(e) => {
                                debug!(
                                    workspace_id = %workspace_id,
                                    error = %e,
                                    "live channel error"
                                );
                                break;
                            }
                        }
                    }
                    debug!(workspace_id = %workspace_id, "live channel closed");
                }
                Err(e) => {
                    debug!(workspace_id = %workspace_id, error = %e, "live connect failed");
                }
            }

            self.set_connection(ConnectionState::Disconnected);
            if !self.is_joined_to(&workspace_id) {
                break;
            }
            let delay = self.config.reconnect.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }
}
