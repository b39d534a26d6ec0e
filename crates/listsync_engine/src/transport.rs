//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use listsync_protocol::{
    LiveMessage, RegisterPushRequest, SyncRequest, SyncResponse, WorkspaceCode, WorkspaceInfo,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Request/response calls to the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, mock for testing).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Creates a new workspace.
    async fn create_workspace(&self) -> SyncResult<WorkspaceInfo>;

    /// Resolves a pairing code.
    async fn resolve_workspace(&self, code: &str) -> SyncResult<WorkspaceInfo>;

    /// Runs one sync round.
    async fn sync(&self, workspace_id: &str, request: &SyncRequest) -> SyncResult<SyncResponse>;

    /// Registers this device's push endpoint.
    async fn register_push(&self, workspace_id: &str, request: &RegisterPushRequest)
        -> SyncResult<()>;
}

/// Stream of messages from an open live channel. Ends when the channel closes.
pub type LiveStream = BoxStream<'static, SyncResult<LiveMessage>>;

/// Opens live channels.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connects to a workspace's live channel as `device_id`.
    async fn connect(&self, workspace_id: &str, device_id: &str) -> SyncResult<LiveStream>;
}

/// A mock transport for testing.
///
/// Records every sync request and answers with queued responses. When no
/// response is queued it echoes nothing back with `syncedAt` 1.
#[derive(Debug, Default)]
pub struct MockTransport {
    offline: AtomicBool,
    workspace: Mutex<Option<WorkspaceInfo>>,
    responses: Mutex<VecDeque<SyncResponse>>,
    requests: Mutex<Vec<SyncRequest>>,
    push_registrations: Mutex<Vec<RegisterPushRequest>>,
}

impl MockTransport {
    /// Creates a mock that knows one workspace.
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.workspace.lock() = Some(WorkspaceInfo {
            id: "mock-workspace".into(),
            code: WorkspaceCode::parse("K7M3P9QZ").unwrap_or_else(|_| WorkspaceCode::random()),
        });
        mock
    }

    /// Makes every call fail with a retryable transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Queues the response of the next sync.
    pub fn push_response(&self, response: SyncResponse) {
        self.responses.lock().push_back(response);
    }

    /// Sync requests received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Push registrations received so far.
    pub fn push_registrations(&self) -> Vec<RegisterPushRequest> {
        self.push_registrations.lock().clone()
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::transport_retryable("mock transport offline"))
        } else {
            Ok(())
        }
    }

    fn workspace(&self) -> SyncResult<WorkspaceInfo> {
        self.workspace
            .lock()
            .clone()
            .ok_or_else(|| SyncError::NotFound("workspace".into()))
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn create_workspace(&self) -> SyncResult<WorkspaceInfo> {
        self.check_online()?;
        self.workspace()
    }

    async fn resolve_workspace(&self, code: &str) -> SyncResult<WorkspaceInfo> {
        self.check_online()?;
        let info = self.workspace()?;
        if WorkspaceCode::normalize(code) == info.code.as_str() {
            Ok(info)
        } else {
            Err(SyncError::NotFound(code.to_string()))
        }
    }

    async fn sync(&self, workspace_id: &str, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.check_online()?;
        if self.workspace()?.id != workspace_id {
            return Err(SyncError::NotFound(workspace_id.to_string()));
        }
        self.requests.lock().push(request.clone());
        Ok(self.responses.lock().pop_front().unwrap_or(SyncResponse {
            lists: Vec::new(),
            items: Vec::new(),
            synced_at: 1,
        }))
    }

    async fn register_push(
        &self,
        _workspace_id: &str,
        request: &RegisterPushRequest,
    ) -> SyncResult<()> {
        self.check_online()?;
        self.push_registrations.lock().push(request.clone());
        Ok(())
    }
}

/// Live connector fed by test code.
///
/// Each [`connect`](LiveConnector::connect) hands out a fresh channel whose
/// sender is kept for [`send`](Self::send). Dropping the senders with
/// [`disconnect`](Self::disconnect) closes the stream, which makes the
/// agent reconnect.
#[derive(Debug, Default)]
pub struct MockLiveConnector {
    refuse: AtomicBool,
    senders: Mutex<Vec<mpsc::UnboundedSender<SyncResult<LiveMessage>>>>,
    connects: Mutex<Vec<(String, String)>>,
}

impl MockLiveConnector {
    /// Creates a connector that accepts connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent connects fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Delivers a message on every open channel. Returns how many got it.
    pub fn send(&self, message: LiveMessage) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.send(Ok(message.clone())).is_ok())
            .count()
    }

    /// Closes every open channel.
    pub fn disconnect(&self) {
        self.senders.lock().clear();
    }

    /// Number of connects attempted that succeeded.
    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    /// Number of channels still open.
    pub fn open_channels(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

#[async_trait]
impl LiveConnector for MockLiveConnector {
    async fn connect(&self, workspace_id: &str, device_id: &str) -> SyncResult<LiveStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection refused"));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        self.connects
            .lock()
            .push((workspace_id.to_string(), device_id.to_string()));

        let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
        Ok(Box::pin(stream))
    }
}
