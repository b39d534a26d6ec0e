//! Main sync server.

use crate::config::ServerConfig;
use crate::directory::WorkspaceDirectory;
use crate::error::{ServerError, ServerResult};
use crate::fanout::LiveHub;
use crate::merge::MergeEngine;
use crate::notify::{Notifier, PushDelivery, WebhookDelivery};
use listsync_protocol::{
    Clock, MonotonicClock, PushSubscription, RegisterPushRequest, RegisterPushResponse,
    SyncRequest, SyncResponse, WorkspaceInfo,
};
use listsync_store::{FileStore, InMemoryStore, WorkspaceStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The sync server.
///
/// Ties the workspace directory, merge engine, live hub and notifier
/// together. Transports (see [`crate::http`]) call into this type; it knows
/// nothing about HTTP.
///
/// # Example
///
/// ```
/// use listsync_protocol::SyncRequest;
/// use listsync_server::{ServerConfig, SyncServer};
///
/// # tokio_test();
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn tokio_test() {
/// let server = SyncServer::open(ServerConfig::default()).unwrap();
/// let info = server.create_workspace().await.unwrap();
/// let response = server.sync(&info.id, SyncRequest::new("phone", 0)).await.unwrap();
/// assert!(response.items.is_empty());
/// # }
/// ```
pub struct SyncServer {
    config: ServerConfig,
    directory: Arc<WorkspaceDirectory>,
    merge: Arc<MergeEngine>,
    hub: Arc<LiveHub>,
    notifier: Arc<Notifier>,
}

impl SyncServer {
    /// Opens a server, persisting to `config.data_dir` if one is set.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let store: Arc<dyn WorkspaceStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => {
                warn!("no data directory configured; workspaces live in memory only");
                Arc::new(InMemoryStore::new())
            }
        };
        Self::with_parts(config, store, Arc::new(WebhookDelivery::default()))
    }

    /// Creates a server over an explicit store and delivery.
    pub fn with_parts(
        config: ServerConfig,
        store: Arc<dyn WorkspaceStore>,
        delivery: Arc<dyn PushDelivery>,
    ) -> ServerResult<Self> {
        Self::with_clock(config, store, delivery, Arc::new(MonotonicClock::new()))
    }

    /// Like [`with_parts`](Self::with_parts), stamping `syncedAt` and
    /// `createdAt` from `clock`.
    pub fn with_clock(
        config: ServerConfig,
        store: Arc<dyn WorkspaceStore>,
        delivery: Arc<dyn PushDelivery>,
        clock: Arc<dyn Clock>,
    ) -> ServerResult<Self> {
        let directory = Arc::new(WorkspaceDirectory::open(store, Arc::clone(&clock))?);
        let merge = Arc::new(MergeEngine::new(
            Arc::clone(&directory),
            clock,
            config.max_batch,
        ));
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&directory),
            delivery,
            config.notify_timeout,
            config.notification_title.clone(),
            config.notification_icon.clone(),
        ));

        info!(workspaces = directory.len(), "sync server ready");
        Ok(Self {
            config,
            directory,
            merge,
            hub: Arc::new(LiveHub::new()),
            notifier,
        })
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the workspace directory.
    pub fn directory(&self) -> &Arc<WorkspaceDirectory> {
        &self.directory
    }

    /// Returns the live connection hub.
    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Returns the notifier.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Creates an empty workspace.
    pub async fn create_workspace(&self) -> ServerResult<WorkspaceInfo> {
        let directory = Arc::clone(&self.directory);
        tokio::task::spawn_blocking(move || directory.create()).await?
    }

    /// Resolves a pairing code, ignoring case.
    pub fn resolve_workspace(&self, code: &str) -> ServerResult<WorkspaceInfo> {
        self.directory.resolve(code)
    }

    /// Returns true if the workspace exists.
    pub fn workspace_exists(&self, workspace_id: &str) -> bool {
        self.directory.contains(workspace_id)
    }

    /// Runs one sync round.
    ///
    /// Once the merge is durable, winning records are pushed to the other
    /// live connections of the workspace and a notification round is started
    /// in the background. Neither delays nor fails the response.
    pub async fn sync(
        &self,
        workspace_id: &str,
        request: SyncRequest,
    ) -> ServerResult<SyncResponse> {
        let device_id = request.device_id.clone();
        let merge = Arc::clone(&self.merge);
        let id = workspace_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || merge.sync(&id, request)).await??;

        if !outcome.changes.is_empty() {
            let exclude = (!device_id.is_empty()).then_some(device_id.as_str());
            let queued = self.hub.broadcast(workspace_id, &outcome.changes, exclude);
            debug!(workspace_id, queued, "fanned out changes");

            let notifier = Arc::clone(&self.notifier);
            let id = workspace_id.to_string();
            let changes = outcome.changes;
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&id, &device_id, &changes).await {
                    warn!(workspace_id = %id, error = %e, "notification round failed");
                }
            });
        }

        Ok(outcome.response)
    }

    /// Registers (or replaces) a device's push endpoint.
    pub async fn register_push(
        &self,
        workspace_id: &str,
        request: RegisterPushRequest,
    ) -> ServerResult<RegisterPushResponse> {
        if request.device_id.is_empty() {
            return Err(ServerError::InvalidRequest("deviceId is required".into()));
        }
        if request.subscription.endpoint.is_empty() {
            return Err(ServerError::InvalidRequest(
                "subscription endpoint is required".into(),
            ));
        }

        let directory = Arc::clone(&self.directory);
        let id = workspace_id.to_string();
        let device_id = request.device_id.clone();
        let replaced = tokio::task::spawn_blocking(move || {
            directory.transact(&id, |record| {
                let replaced = record.upsert_subscription(PushSubscription {
                    device_id: request.device_id,
                    endpoint: request.subscription,
                });
                (replaced, true)
            })
        })
        .await??;

        info!(workspace_id, device_id = %device_id, replaced, "push endpoint registered");
        Ok(RegisterPushResponse { success: true })
    }

    /// Closes every live connection.
    pub fn shutdown(&self) {
        self.hub.shutdown();
        info!("sync server shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_protocol::{Item, LiveMessage, PushEndpoint};
    use tokio::sync::mpsc;

    fn server() -> SyncServer {
        SyncServer::open(ServerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn create_resolve_sync() {
        let server = server();
        let info = server.create_workspace().await.unwrap();
        assert_eq!(server.resolve_workspace(info.code.as_str()).unwrap(), info);

        let request = SyncRequest::new("phone", 0)
            .with_items(vec![Item::new("i1", "inbox", "Buy milk", 1000)]);
        let response = server.sync(&info.id, request).await.unwrap();
        assert_eq!(response.items.len(), 1);
    }

    #[tokio::test]
    async fn sync_unknown_workspace() {
        let server = server();
        let err = server
            .sync("missing", SyncRequest::new("phone", 0))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn changes_reach_other_devices_only() {
        let server = server();
        let info = server.create_workspace().await.unwrap();
        let (tx_phone, mut rx_phone) = mpsc::channel(4);
        let (tx_laptop, mut rx_laptop) = mpsc::channel(4);
        server.hub().register(&info.id, Some("phone".into()), tx_phone);
        server.hub().register(&info.id, Some("laptop".into()), tx_laptop);

        let request = SyncRequest::new("phone", 0)
            .with_items(vec![Item::new("i1", "inbox", "Buy milk", 1000)]);
        server.sync(&info.id, request).await.unwrap();

        assert!(rx_phone.try_recv().is_err());
        let message = rx_laptop.try_recv().unwrap();
        let LiveMessage::Sync { changes } = message.as_ref();
        assert_eq!(changes.items[0].text, "Buy milk");
    }

    #[tokio::test]
    async fn losing_push_is_not_fanned_out() {
        let server = server();
        let info = server.create_workspace().await.unwrap();
        let mut newer = Item::new("i1", "inbox", "new", 1000);
        newer.updated_at = 2000;
        server
            .sync(&info.id, SyncRequest::new("a", 0).with_items(vec![newer]))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        server.hub().register(&info.id, Some("c".into()), tx);
        let older = Item::new("i1", "inbox", "old", 1500);
        server
            .sync(&info.id, SyncRequest::new("b", 0).with_items(vec![older]))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_push_replaces_per_device() {
        let server = server();
        let info = server.create_workspace().await.unwrap();
        for url in ["https://push/1", "https://push/2"] {
            let request = RegisterPushRequest {
                device_id: "phone".into(),
                subscription: PushEndpoint::new(url),
            };
            assert!(server.register_push(&info.id, request).await.unwrap().success);
        }

        let record = server.directory().load(&info.id).unwrap();
        assert_eq!(record.subscriptions.len(), 1);
        assert_eq!(record.subscriptions[0].endpoint.endpoint, "https://push/2");
    }

    #[tokio::test]
    async fn register_push_validates() {
        let server = server();
        let info = server.create_workspace().await.unwrap();
        let request = RegisterPushRequest {
            device_id: "phone".into(),
            subscription: PushEndpoint::new(""),
        };
        let err = server.register_push(&info.id, request).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));

        let request = RegisterPushRequest {
            device_id: "phone".into(),
            subscription: PushEndpoint::new("https://push"),
        };
        let err = server.register_push("missing", request).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn persists_across_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ServerConfig::default().with_data_dir(tmp.path());

        let info = {
            let server = SyncServer::open(config.clone()).unwrap();
            let info = server.create_workspace().await.unwrap();
            let request = SyncRequest::new("phone", 0)
                .with_items(vec![Item::new("i1", "inbox", "Buy milk", 1000)]);
            server.sync(&info.id, request).await.unwrap();
            info
        };

        let server = SyncServer::open(config).unwrap();
        let resolved = server.resolve_workspace(info.code.as_str()).unwrap();
        let response = server
            .sync(&resolved.id, SyncRequest::new("laptop", 0))
            .await
            .unwrap();
        assert_eq!(response.items[0].text, "Buy milk");
    }
}
