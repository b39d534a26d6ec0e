//! Merge engine: applies a client batch and computes the catch-up set.

use crate::directory::WorkspaceDirectory;
use crate::error::{ServerError, ServerResult};
use listsync_protocol::{
    is_builtin_list, lww, ChangeSet, Clock, List, Record, SyncRequest, SyncResponse,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// What to return to the caller.
    pub response: SyncResponse,
    /// Incoming records that won, to fan out to other devices.
    pub changes: ChangeSet,
}

/// Merges client batches into stored workspaces.
///
/// For every incoming record independently:
/// - absent on the server: inserted, reported as a change
/// - strictly newer than the stored copy: replaces it, reported as a change
/// - otherwise: dropped, the stored copy wins
///
/// The response then carries every stored record newer than the caller's
/// watermark, which is how the caller catches up on other devices' work.
pub struct MergeEngine {
    directory: Arc<WorkspaceDirectory>,
    clock: Arc<dyn Clock>,
    max_batch: usize,
}

impl MergeEngine {
    /// Creates a merge engine.
    pub fn new(
        directory: Arc<WorkspaceDirectory>,
        clock: Arc<dyn Clock>,
        max_batch: usize,
    ) -> Self {
        Self {
            directory,
            clock,
            max_batch,
        }
    }

    /// Runs one sync round for `workspace_id`.
    ///
    /// The whole read-merge-persist cycle runs inside the workspace's
    /// exclusive section. Unknown workspaces fail before anything is applied.
    pub fn sync(&self, workspace_id: &str, request: SyncRequest) -> ServerResult<MergeOutcome> {
        if !self.directory.contains(workspace_id) {
            return Err(ServerError::WorkspaceNotFound(workspace_id.to_string()));
        }
        if request.lists.len() > self.max_batch || request.items.len() > self.max_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many records: {} lists, {} items > {}",
                request.lists.len(),
                request.items.len(),
                self.max_batch
            )));
        }

        let SyncRequest {
            device_id,
            last_sync_at,
            lists,
            items,
        } = request;
        let lists = reject_builtin_tombstones(lists, workspace_id);

        self.directory.transact(workspace_id, |record| {
            let changes = ChangeSet {
                lists: lww::merge_batch(&mut record.lists, lists),
                items: lww::merge_batch(&mut record.items, items),
            };

            let response = SyncResponse {
                lists: lww::changed_since(&record.lists, last_sync_at),
                items: lww::changed_since(&record.items, last_sync_at),
                synced_at: self.clock.now(),
            };

            debug!(
                workspace_id,
                device_id = %device_id,
                changed = changes.len(),
                returned = response.lists.len() + response.items.len(),
                since = last_sync_at,
                "merged sync batch"
            );

            let changed = !changes.is_empty();
            (MergeOutcome { response, changes }, changed)
        })
    }
}

/// Built-in lists can never be deleted, whichever device asks.
fn reject_builtin_tombstones(lists: Vec<List>, workspace_id: &str) -> Vec<List> {
    lists
        .into_iter()
        .filter(|list| {
            let rejected = list.is_deleted() && is_builtin_list(&list.id);
            if rejected {
                warn!(workspace_id, list_id = %list.id, "ignoring deletion of built-in list");
            }
            !rejected
        })
        .collect()
}
