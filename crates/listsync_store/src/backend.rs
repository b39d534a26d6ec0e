//! Store trait definition.

use crate::error::StoreResult;
use listsync_protocol::WorkspaceRecord;

/// Durable storage of workspace documents.
///
/// # Invariants
///
/// - `save` replaces the whole document or leaves the previous one intact;
///   a reader never observes a partially written document
/// - `load` returns exactly the document last saved under that id
/// - Stores must be `Send + Sync`; callers provide per-workspace exclusion
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait WorkspaceStore: Send + Sync {
    /// Loads a workspace, or `None` if it was never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or decoded.
    fn load(&self, id: &str) -> StoreResult<Option<WorkspaceRecord>>;

    /// Saves a workspace, replacing any previous document with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written. The previously
    /// saved document stays authoritative.
    fn save(&self, record: &WorkspaceRecord) -> StoreResult<()>;

    /// Returns the ids of all stored workspaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list_ids(&self) -> StoreResult<Vec<String>>;

    /// Loads every stored workspace.
    ///
    /// # Errors
    ///
    /// Returns the first load error encountered.
    fn load_all(&self) -> StoreResult<Vec<WorkspaceRecord>> {
        let mut records = Vec::new();
        for id in self.list_ids()? {
            if let Some(record) = self.load(&id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
