//! HTTP and WebSocket transport for [`SyncServer`].
//!
//! Routes:
//! - `POST /api/workspaces` creates a workspace
//! - `GET  /api/workspaces/{code}` resolves a pairing code
//! - `POST /api/workspaces/{id}/subscribe` registers a push endpoint
//! - `POST /api/sync/{id}` runs a sync round
//! - `GET  /ws/{id}?deviceId=...` opens the live channel
//! - `GET  /health` reports liveness

use crate::error::ServerError;
use crate::fanout::LIVE_QUEUE_CAPACITY;
use crate::server::SyncServer;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use listsync_protocol::{
    ErrorBody, LiveMessage, RegisterPushRequest, RegisterPushResponse, SyncRequest, SyncResponse,
    WorkspaceInfo,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

type AppState = Arc<SyncServer>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %self, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

/// Builds the router with CORS and request tracing applied.
pub fn router(server: Arc<SyncServer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/workspaces", post(create_workspace))
        .route("/api/workspaces/{workspace}", get(resolve_workspace))
        .route("/api/workspaces/{workspace}/subscribe", post(register_push))
        .route("/api/sync/{workspace}", post(sync))
        .route("/ws/{workspace}", get(live_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(server)
}

/// Serves on the configured bind address until `shutdown` resolves.
pub async fn serve<F>(server: Arc<SyncServer>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(server.config().bind_addr).await?;
    serve_listener(listener, server, shutdown).await
}

/// Serves on an already bound listener until `shutdown` resolves.
///
/// Live connections are closed as soon as shutdown begins so that the
/// graceful drain does not wait on them.
pub async fn serve_listener<F>(
    listener: TcpListener,
    server: Arc<SyncServer>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "listening");
    let app = router(Arc::clone(&server));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            server.shutdown();
        })
        .await
}

async fn create_workspace(
    State(server): State<AppState>,
) -> Result<Json<WorkspaceInfo>, ServerError> {
    Ok(Json(server.create_workspace().await?))
}

async fn resolve_workspace(
    State(server): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<WorkspaceInfo>, ServerError> {
    Ok(Json(server.resolve_workspace(&code)?))
}

async fn sync(
    State(server): State<AppState>,
    Path(workspace_id): Path<String>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, ServerError> {
    let Json(request) = payload?;
    Ok(Json(server.sync(&workspace_id, request).await?))
}

async fn register_push(
    State(server): State<AppState>,
    Path(workspace_id): Path<String>,
    payload: Result<Json<RegisterPushRequest>, JsonRejection>,
) -> Result<Json<RegisterPushResponse>, ServerError> {
    let Json(request) = payload?;
    Ok(Json(server.register_push(&workspace_id, request).await?))
}

async fn health(State(server): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "workspaces": server.directory().len(),
        "connections": server.hub().total_connections(),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveParams {
    device_id: Option<String>,
}

async fn live_upgrade(
    ws: WebSocketUpgrade,
    State(server): State<AppState>,
    Path(workspace_id): Path<String>,
    Query(params): Query<LiveParams>,
) -> Response {
    if !server.workspace_exists(&workspace_id) {
        return ServerError::WorkspaceNotFound(workspace_id).into_response();
    }
    let device_id = params.device_id.filter(|d| !d.is_empty());
    ws.on_upgrade(move |socket| handle_live(socket, server, workspace_id, device_id))
}

/// Pumps hub messages to the socket until either side goes away.
///
/// Inbound frames carry no meaning on this channel and are discarded.
async fn handle_live(
    socket: WebSocket,
    server: AppState,
    workspace_id: String,
    device_id: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<LiveMessage>>(LIVE_QUEUE_CAPACITY);
    let connection = server.hub().register(&workspace_id, device_id, tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode live message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(error = %e, "live send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    server.hub().unregister(&workspace_id, connection);
}
