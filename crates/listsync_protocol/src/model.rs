//! Replicated records and the per-workspace document.

use crate::code::WorkspaceCode;
use crate::messages::WorkspaceInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Id of the list that receives items whose list is deleted.
pub const INBOX_LIST_ID: &str = "inbox";

/// Lists that exist in every workspace and can never be deleted.
pub const BUILTIN_LIST_IDS: [&str; 4] = [INBOX_LIST_ID, "todo", "shopping", "ideas"];

/// Returns true if `id` names one of the built-in lists.
pub fn is_builtin_list(id: &str) -> bool {
    BUILTIN_LIST_IDS.contains(&id)
}

/// A record replicated with last-write-wins semantics.
pub trait Record: Clone {
    /// Unique id of the record within its workspace.
    fn id(&self) -> &str;

    /// Modification time used for conflict resolution.
    fn updated_at(&self) -> Timestamp;

    /// Returns true if the record is a tombstone.
    fn is_deleted(&self) -> bool;
}

/// A named list of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    /// List id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Icon name.
    pub icon: String,
    /// Display colour (CSS hex).
    pub color: String,
    /// Display sort position.
    pub order: i32,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Timestamp,
    /// Deletion time; `Some` marks a tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl List {
    /// Creates a live list.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        icon: impl Into<String>,
        color: impl Into<String>,
        order: i32,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: icon.into(),
            color: color.into(),
            order,
            description: None,
            updated_at,
            deleted_at: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Record for List {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A single entry of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Item id.
    pub id: String,
    /// Id of the owning list.
    pub list_id: String,
    /// Item text.
    pub text: String,
    /// Whether the item is checked off.
    #[serde(default)]
    pub completed: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Deletion time; `Some` marks a tombstone.
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Item {
    /// Creates a live, uncompleted item created and updated at `now`.
    pub fn new(
        id: impl Into<String>,
        list_id: impl Into<String>,
        text: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            list_id: list_id.into(),
            text: text.into(),
            completed: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Record for Item {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Delivery descriptor handed out by a device's push provider.
///
/// Only `endpoint` is interpreted; every other field is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEndpoint {
    /// URL that accepts notification deliveries.
    pub endpoint: String,
    /// Provider-specific fields (keys, expiration, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PushEndpoint {
    /// Creates an endpoint with no extra fields.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A device's registration for fallback notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    /// Client-chosen device id.
    pub device_id: String,
    /// Where to deliver notifications.
    pub endpoint: PushEndpoint,
}

/// The durable document of one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    /// Globally unique workspace id.
    pub id: String,
    /// Human-shareable pairing code.
    pub code: WorkspaceCode,
    /// Creation time.
    pub created_at: Timestamp,
    /// Lists keyed by id.
    #[serde(default)]
    pub lists: BTreeMap<String, List>,
    /// Items keyed by id.
    #[serde(default)]
    pub items: BTreeMap<String, Item>,
    /// Fallback notification registrations, one per device.
    #[serde(default)]
    pub subscriptions: Vec<PushSubscription>,
}

impl WorkspaceRecord {
    /// Creates an empty workspace.
    pub fn new(id: impl Into<String>, code: WorkspaceCode, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            code,
            created_at,
            lists: BTreeMap::new(),
            items: BTreeMap::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Returns the public id/code pair.
    pub fn info(&self) -> WorkspaceInfo {
        WorkspaceInfo {
            id: self.id.clone(),
            code: self.code.clone(),
        }
    }

    /// Inserts a subscription, replacing any existing one for the same device.
    ///
    /// Returns true if an older registration was replaced.
    pub fn upsert_subscription(&mut self, subscription: PushSubscription) -> bool {
        match self
            .subscriptions
            .iter_mut()
            .find(|s| s.device_id == subscription.device_id)
        {
            Some(existing) => {
                *existing = subscription;
                true
            }
            None => {
                self.subscriptions.push(subscription);
                false
            }
        }
    }

    /// Removes the device's subscription if it still points at `endpoint`.
    ///
    /// A device that re-registered with a fresh endpoint keeps it.
    pub fn remove_subscription(&mut self, device_id: &str, endpoint: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| !(s.device_id == device_id && s.endpoint.endpoint == endpoint));
        self.subscriptions.len() != before
    }

    /// Number of items that are not tombstones.
    pub fn live_item_count(&self) -> usize {
        self.items.values().filter(|i| !i.is_deleted()).count()
    }

    /// Number of lists that are not tombstones.
    pub fn live_list_count(&self) -> usize {
        self.lists.values().filter(|l| !l.is_deleted()).count()
    }
}

/// The lists every fresh replica starts with.
///
/// They carry `updatedAt = 0`, so any real edit from any device wins.
pub fn default_lists() -> Vec<List> {
    vec![
        List::new("inbox", "Inbox", "inbox", "#64748b", 0, 0)
            .with_description("Uncategorized items and quick captures"),
        List::new("todo", "To-Do", "check-circle", "#22c55e", 1, 0)
            .with_description("Tasks and action items to complete"),
        List::new("shopping", "Shopping", "shopping-cart", "#f97316", 2, 0)
            .with_description("Things to buy - groceries, household items, etc."),
        List::new("ideas", "Ideas", "lightbulb", "#eab308", 3, 0)
            .with_description("Creative ideas, thoughts, and inspiration"),
    ]
}
