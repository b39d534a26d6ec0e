//! HTTP and WebSocket transports.

use crate::config::AgentConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{LiveConnector, LiveStream, SyncTransport};
use async_trait::async_trait;
use futures::StreamExt;
use listsync_protocol::{
    ErrorBody, LiveMessage, RegisterPushRequest, SyncRequest, SyncResponse, WorkspaceInfo,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};
use url::Url;

/// Talks to the sync server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for `config.server_url`.
    pub fn new(config: &AgentConfig) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(config.base_url(), http)
    }

    /// Creates a transport over an existing client.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> SyncResult<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| SyncError::transport_fatal(format!("invalid server url: {e}")))?;
        Ok(Self { base_url, http })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> SyncResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::transport_fatal(format!("invalid url {path}: {e}")))
    }
}

/// Decodes a success body or maps the status to an error.
async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());
    match status {
        StatusCode::NOT_FOUND => Err(SyncError::NotFound(message)),
        status => Err(SyncError::Server {
            status: status.as_u16(),
            message,
        }),
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn create_workspace(&self) -> SyncResult<WorkspaceInfo> {
        let response = self.http.post(self.url("api/workspaces")?).send().await?;
        decode(response).await
    }

    async fn resolve_workspace(&self, code: &str) -> SyncResult<WorkspaceInfo> {
        let url = self.url(&format!("api/workspaces/{}", code.trim().to_ascii_uppercase()))?;
        let response = self.http.get(url).send().await?;
        decode(response).await
    }

    async fn sync(&self, workspace_id: &str, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let url = self.url(&format!("api/sync/{workspace_id}"))?;
        debug!(
            workspace_id,
            lists = request.lists.len(),
            items = request.items.len(),
            since = request.last_sync_at,
            "posting sync"
        );
        let response = self.http.post(url).json(request).send().await?;
        decode(response).await
    }

    async fn register_push(
        &self,
        workspace_id: &str,
        request: &RegisterPushRequest,
    ) -> SyncResult<()> {
        let url = self.url(&format!("api/workspaces/{workspace_id}/subscribe"))?;
        let response = self.http.post(url).json(request).send().await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }
}

/// Opens live channels over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: AgentConfig,
}

impl WsConnector {
    /// Creates a connector for `config.server_url`.
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, workspace_id: &str, device_id: &str) -> SyncResult<LiveStream> {
        let mut config = self.config.clone();
        config.device_id = device_id.to_string();
        let url = config.live_url(workspace_id)?;

        let (socket, _) = connect_async(url.as_str()).await?;
        debug!(workspace_id, "live channel open");

        // The write half is dropped: this channel is receive-only and
        // tungstenite answers pings while reading.
        let (_, read) = socket.split();
        let stream = read.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => {
                    Some(LiveMessage::from_json(&text).map_err(SyncError::from))
                }
                Ok(Message::Close(_)) => None,
                Ok(other) => {
                    trace!(kind = ?other, "ignoring live frame");
                    None
                }
                Err(e) => Some(Err(SyncError::from(e))),
            }
        });
        Ok(Box::pin(stream))
    }
}
