//! Fallback notifications for devices without a live connection.

use crate::directory::WorkspaceDirectory;
use crate::error::ServerResult;
use async_trait::async_trait;
use futures::future::join_all;
use listsync_protocol::{ChangeSet, NotificationPayload, PushEndpoint, PushSubscription};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a delivery failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The endpoint no longer exists; its subscription should be dropped.
    #[error("endpoint gone (status {status})")]
    Gone {
        /// HTTP status reported by the provider.
        status: u16,
    },

    /// Any other failure. Logged and dropped, never retried.
    #[error("delivery failed: {0}")]
    Transient(String),
}

/// Delivers one notification to one endpoint.
#[async_trait]
pub trait PushDelivery: Send + Sync {
    /// Sends `payload` to `endpoint`.
    async fn deliver(
        &self,
        endpoint: &PushEndpoint,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

/// Posts the payload as JSON to the endpoint URL.
#[derive(Debug, Clone, Default)]
pub struct WebhookDelivery {
    http: reqwest::Client,
}

impl WebhookDelivery {
    /// Creates a delivery backed by `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PushDelivery for WebhookDelivery {
    async fn deliver(
        &self,
        endpoint: &PushEndpoint,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(&endpoint.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status @ (StatusCode::NOT_FOUND | StatusCode::GONE) => Err(DeliveryError::Gone {
                status: status.as_u16(),
            }),
            status => Err(DeliveryError::Transient(format!("unexpected status {status}"))),
        }
    }
}

/// Outcome of one notification round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Deliveries that succeeded.
    pub delivered: usize,
    /// Deliveries that failed or timed out.
    pub transient_failures: usize,
    /// Subscriptions removed because their endpoint is gone.
    pub removed: usize,
}

/// Sends change summaries to every subscribed device except the originator.
pub struct Notifier {
    directory: Arc<WorkspaceDirectory>,
    delivery: Arc<dyn PushDelivery>,
    timeout: Duration,
    title: String,
    icon: String,
}

impl Notifier {
    /// Creates a notifier.
    pub fn new(
        directory: Arc<WorkspaceDirectory>,
        delivery: Arc<dyn PushDelivery>,
        timeout: Duration,
        title: impl Into<String>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            delivery,
            timeout,
            title: title.into(),
            icon: icon.into(),
        }
    }

    /// Builds the payload for a change set, or `None` if there is nothing to say.
    pub fn payload_for(&self, changes: &ChangeSet) -> Option<NotificationPayload> {
        changes.summary().map(|body| NotificationPayload {
            title: self.title.clone(),
            body,
            icon: self.icon.clone(),
        })
    }

    /// Notifies every device of `workspace_id` other than `exclude_device`.
    ///
    /// Deliveries run concurrently, each bounded by the configured timeout.
    /// Subscriptions whose endpoint reports it is gone are removed, unless
    /// the device re-registered with a different endpoint meanwhile.
    pub async fn notify(
        &self,
        workspace_id: &str,
        exclude_device: &str,
        changes: &ChangeSet,
    ) -> ServerResult<NotifyReport> {
        let Some(payload) = self.payload_for(changes) else {
            return Ok(NotifyReport::default());
        };

        let directory = Arc::clone(&self.directory);
        let id = workspace_id.to_string();
        let record = tokio::task::spawn_blocking(move || directory.load(&id)).await??;

        let targets: Vec<PushSubscription> = record
            .subscriptions
            .into_iter()
            .filter(|s| s.device_id != exclude_device)
            .collect();
        if targets.is_empty() {
            return Ok(NotifyReport::default());
        }

        let payload = &payload;
        let outcomes = join_all(targets.iter().map(|target| async move {
            let result =
                tokio::time::timeout(self.timeout, self.delivery.deliver(&target.endpoint, payload))
                    .await;
            (target, result)
        }))
        .await;

        let mut report = NotifyReport::default();
        let mut gone = Vec::new();
        for (target, result) in outcomes {
            match result {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(DeliveryError::Gone { status })) => {
                    debug!(
                        workspace_id,
                        device_id = %target.device_id,
                        status,
                        "push endpoint gone"
                    );
                    gone.push((target.device_id.clone(), target.endpoint.endpoint.clone()));
                }
                Ok(Err(e)) => {
                    report.transient_failures += 1;
                    warn!(
                        workspace_id,
                        device_id = %target.device_id,
                        error = %e,
                        "notification failed"
                    );
                }
                Err(_) => {
                    report.transient_failures += 1;
                    warn!(workspace_id, device_id = %target.device_id, "notification timed out");
                }
            }
        }

        if !gone.is_empty() {
            let directory = Arc::clone(&self.directory);
            let id = workspace_id.to_string();
            report.removed = tokio::task::spawn_blocking(move || {
                directory.transact(&id, |record| {
                    let removed = gone
                        .iter()
                        .filter(|(device, endpoint)| record.remove_subscription(device, endpoint))
                        .count();
                    (removed, removed > 0)
                })
            })
            .await??;
            info!(workspace_id, removed = report.removed, "pruned expired push subscriptions");
        }

        Ok(report)
    }
}
