//! Request, response and push messages.
//!
//! All messages are JSON with camelCase field names.

use crate::code::WorkspaceCode;
use crate::error::ProtocolResult;
use crate::model::{Item, List, PushEndpoint, Timestamp};
use serde::{Deserialize, Serialize};

/// Public identity of a workspace, returned by create and resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Workspace id.
    pub id: String,
    /// Pairing code.
    pub code: WorkspaceCode,
}

/// Body of `POST /api/sync/{workspaceId}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Device that made the local changes.
    #[serde(default)]
    pub device_id: String,
    /// The caller's watermark; records newer than this are returned.
    #[serde(default)]
    pub last_sync_at: Timestamp,
    /// Locally changed lists.
    #[serde(default)]
    pub lists: Vec<List>,
    /// Locally changed items.
    #[serde(default)]
    pub items: Vec<Item>,
}

impl SyncRequest {
    /// Creates a request with no local changes.
    pub fn new(device_id: impl Into<String>, last_sync_at: Timestamp) -> Self {
        Self {
            device_id: device_id.into(),
            last_sync_at,
            lists: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Adds local lists.
    pub fn with_lists(mut self, lists: Vec<List>) -> Self {
        self.lists = lists;
        self
    }

    /// Adds local items.
    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }
}

/// Response of a sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Stored lists changed after the caller's watermark.
    pub lists: Vec<List>,
    /// Stored items changed after the caller's watermark.
    pub items: Vec<Item>,
    /// Server time of this sync; the caller's next watermark.
    pub synced_at: Timestamp,
}

/// Records that won a merge, fanned out to other devices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changed lists.
    #[serde(default)]
    pub lists: Vec<List>,
    /// Changed items.
    #[serde(default)]
    pub items: Vec<Item>,
}

impl ChangeSet {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.items.is_empty()
    }

    /// Total number of changed records.
    pub fn len(&self) -> usize {
        self.lists.len() + self.items.len()
    }

    /// Human-readable count, e.g. `"3 items and 1 list updated"`.
    ///
    /// Returns `None` for an empty change set.
    pub fn summary(&self) -> Option<String> {
        let items = count_noun(self.items.len(), "item");
        let lists = count_noun(self.lists.len(), "list");
        let subject = match (items, lists) {
            (None, None) => return None,
            (Some(items), None) => items,
            (None, Some(lists)) => lists,
            (Some(items), Some(lists)) => format!("{items} and {lists}"),
        };
        Some(format!("{subject} updated"))
    }
}

fn count_noun(count: usize, noun: &str) -> Option<String> {
    match count {
        0 => None,
        1 => Some(format!("1 {noun}")),
        n => Some(format!("{n} {noun}s")),
    }
}

/// Message pushed by the server over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage {
    /// Records another device just synced.
    Sync {
        /// The winning records.
        changes: ChangeSet,
    },
}

impl LiveMessage {
    /// Encodes to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a JSON text frame.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Body of `POST /api/workspaces/{workspaceId}/subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPushRequest {
    /// Device registering.
    pub device_id: String,
    /// Delivery descriptor from the device's push provider.
    pub subscription: PushEndpoint,
}

/// Response of a push registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPushResponse {
    /// Always true on success.
    pub success: bool,
}

/// Payload delivered to a push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification title.
    pub title: String,
    /// Notification body, e.g. the change summary.
    pub body: String,
    /// Icon reference.
    pub icon: String,
}

/// JSON error body returned with 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
}
