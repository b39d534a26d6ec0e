//! In-memory store for testing.

use crate::backend::WorkspaceStore;
use crate::error::StoreResult;
use listsync_protocol::WorkspaceRecord;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory workspace store.
///
/// This store keeps all documents in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral servers that don't need persistence
///
/// # Example
///
/// ```rust
/// use listsync_protocol::{WorkspaceCode, WorkspaceRecord};
/// use listsync_store::{InMemoryStore, WorkspaceStore};
///
/// let store = InMemoryStore::new();
/// store.save(&WorkspaceRecord::new("w1", WorkspaceCode::random(), 0)).unwrap();
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, WorkspaceRecord>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored workspaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no workspace is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl WorkspaceStore for InMemoryStore {
    fn load(&self, id: &str) -> StoreResult<Option<WorkspaceRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn save(&self, record: &WorkspaceRecord) -> StoreResult<()> {
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn list_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }
}
