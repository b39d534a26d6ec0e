//! Live connection hub.
//!
//! Tracks the open live channels of every workspace and forwards merged
//! changes to them. Delivery is best effort: a peer whose queue is full or
//! closed is skipped, and the next sync round repairs whatever it missed.

use listsync_protocol::{ChangeSet, LiveMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Outbound queue depth per connection.
pub const LIVE_QUEUE_CAPACITY: usize = 64;

/// Identifies one live connection.
pub type ConnectionId = u64;

/// Queue feeding one connection's writer task.
pub type LiveSender = mpsc::Sender<Arc<LiveMessage>>;

struct Peer {
    device_id: Option<String>,
    sender: LiveSender,
}

/// Registry of live connections, grouped by workspace.
#[derive(Default)]
pub struct LiveHub {
    next_id: AtomicU64,
    workspaces: RwLock<HashMap<String, HashMap<ConnectionId, Peer>>>,
}

impl LiveHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection to `workspace_id`.
    ///
    /// `device_id` is optional; connections that declare one never receive
    /// their own device's changes back.
    pub fn register(
        &self,
        workspace_id: &str,
        device_id: Option<String>,
        sender: LiveSender,
    ) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut workspaces = self.workspaces.write();
        workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .insert(id, Peer { device_id, sender });
        debug!(workspace_id, connection = id, "live connection registered");
        id
    }

    /// Removes a connection. Safe to call more than once.
    ///
    /// Returns true if the connection was still registered.
    pub fn unregister(&self, workspace_id: &str, connection: ConnectionId) -> bool {
        let mut workspaces = self.workspaces.write();
        let Some(peers) = workspaces.get_mut(workspace_id) else {
            return false;
        };
        let removed = peers.remove(&connection).is_some();
        if peers.is_empty() {
            workspaces.remove(workspace_id);
        }
        if removed {
            debug!(workspace_id, connection, "live connection closed");
        }
        removed
    }

    /// Forwards `changes` to every open connection of the workspace.
    ///
    /// Connections registered by `exclude_device` are skipped. Returns the
    /// number of connections the message was queued for.
    pub fn broadcast(
        &self,
        workspace_id: &str,
        changes: &ChangeSet,
        exclude_device: Option<&str>,
    ) -> usize {
        if changes.is_empty() {
            return 0;
        }

        let workspaces = self.workspaces.read();
        let Some(peers) = workspaces.get(workspace_id) else {
            return 0;
        };

        let message = Arc::new(LiveMessage::Sync {
            changes: changes.clone(),
        });
        let mut queued = 0;
        for (id, peer) in peers {
            if exclude_device.is_some() && peer.device_id.as_deref() == exclude_device {
                continue;
            }
            match peer.sender.try_send(Arc::clone(&message)) {
                Ok(()) => queued += 1,
                Err(e) => trace!(workspace_id, connection = id, error = %e, "skipping live peer"),
            }
        }
        queued
    }

    /// Open connections for one workspace.
    pub fn connection_count(&self, workspace_id: &str) -> usize {
        self.workspaces
            .read()
            .get(workspace_id)
            .map_or(0, HashMap::len)
    }

    /// Open connections across all workspaces.
    pub fn total_connections(&self) -> usize {
        self.workspaces.read().values().map(HashMap::len).sum()
    }

    /// Drops every connection. Writer tasks observe their queue closing.
    pub fn shutdown(&self) {
        let mut workspaces = self.workspaces.write();
        let closed: usize = workspaces.values().map(HashMap::len).sum();
        workspaces.clear();
        debug!(closed, "live hub shut down");
    }
}
