//! Workspace directory: creation, code lookup and per-workspace exclusion.

use crate::error::{ServerError, ServerResult};
use listsync_protocol::{Clock, WorkspaceCode, WorkspaceInfo, WorkspaceRecord};
use listsync_store::WorkspaceStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Attempts at drawing an unused code before giving up.
const MAX_CODE_ATTEMPTS: usize = 16;

#[derive(Debug, Default)]
struct Index {
    /// Upper-case code -> workspace id.
    by_code: HashMap<String, String>,
    /// Every known workspace id.
    ids: HashSet<String>,
    /// Codes drawn by a `create` whose save has not finished.
    reserved: HashSet<String>,
}

impl Index {
    fn code_taken(&self, code: &str) -> bool {
        self.by_code.contains_key(code) || self.reserved.contains(code)
    }
}

/// Owns the record store and everything keyed by workspace.
///
/// The directory maintains:
/// - A code -> id index, rebuilt from the store when opened
/// - One exclusive lock per workspace, serializing read-modify-write cycles
///
/// Different workspaces never contend with each other.
pub struct WorkspaceDirectory {
    store: Arc<dyn WorkspaceStore>,
    clock: Arc<dyn Clock>,
    index: RwLock<Index>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceDirectory {
    /// Opens a directory over `store`, indexing the workspaces it holds.
    ///
    /// Documents that fail to load are logged and left out of the index.
    pub fn open(store: Arc<dyn WorkspaceStore>, clock: Arc<dyn Clock>) -> ServerResult<Self> {
        let mut index = Index::default();
        let mut skipped = 0usize;
        for id in store.list_ids()? {
            let record = match store.load(&id) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    error!(workspace_id = %id, error = %e, "skipping unreadable workspace");
                    skipped += 1;
                    continue;
                }
            };
            index
                .by_code
                .insert(record.code.as_str().to_string(), record.id.clone());
            index.ids.insert(record.id);
        }
        info!(
            workspaces = index.ids.len(),
            skipped,
            "workspace directory opened"
        );

        Ok(Self {
            store,
            clock,
            index: RwLock::new(index),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Creates and persists an empty workspace.
    ///
    /// The drawn code stays reserved while the document is saved.
    pub fn create(&self) -> ServerResult<WorkspaceInfo> {
        let code = {
            let mut index = self.index.write();
            let code = (0..MAX_CODE_ATTEMPTS)
                .map(|_| WorkspaceCode::random())
                .find(|code| !index.code_taken(code.as_str()))
                .ok_or_else(|| ServerError::Internal("could not draw an unused code".into()))?;
            index.reserved.insert(code.as_str().to_string());
            code
        };

        let record = WorkspaceRecord::new(Uuid::new_v4().to_string(), code, self.clock.now());
        let saved = self.store.save(&record);

        let mut index = self.index.write();
        index.reserved.remove(record.code.as_str());
        saved?;
        index
            .by_code
            .insert(record.code.as_str().to_string(), record.id.clone());
        index.ids.insert(record.id.clone());
        drop(index);

        info!(workspace_id = %record.id, code = %record.code, "workspace created");
        Ok(record.info())
    }

    /// Resolves a pairing code, ignoring case.
    pub fn resolve(&self, code: &str) -> ServerResult<WorkspaceInfo> {
        let key = WorkspaceCode::normalize(code);
        let index = self.index.read();
        let id = index
            .by_code
            .get(&key)
            .ok_or_else(|| ServerError::CodeNotFound(code.to_string()))?;
        let code = WorkspaceCode::parse(&key)
            .map_err(|e| ServerError::Internal(format!("indexed code is invalid: {e}")))?;

        Ok(WorkspaceInfo {
            id: id.clone(),
            code,
        })
    }

    /// Returns true if a workspace with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.read().ids.contains(id)
    }

    /// Number of known workspaces.
    pub fn len(&self) -> usize {
        self.index.read().ids.len()
    }

    /// Returns true if no workspace exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads a workspace without taking its lock.
    pub fn load(&self, id: &str) -> ServerResult<WorkspaceRecord> {
        if !self.contains(id) {
            return Err(ServerError::WorkspaceNotFound(id.to_string()));
        }
        self.store
            .load(id)?
            .ok_or_else(|| ServerError::WorkspaceNotFound(id.to_string()))
    }

    /// Runs `f` on the workspace inside its exclusive section.
    ///
    /// `f` returns its result and whether it modified the record; a modified
    /// record is saved before the lock is released. If the save fails, the
    /// error is returned and the previously stored document stays
    /// authoritative.
    ///
    /// Unknown ids fail with [`ServerError::WorkspaceNotFound`] before `f`
    /// runs.
    pub fn transact<R, F>(&self, id: &str, f: F) -> ServerResult<R>
    where
        F: FnOnce(&mut WorkspaceRecord) -> (R, bool),
    {
        if !self.contains(id) {
            return Err(ServerError::WorkspaceNotFound(id.to_string()));
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let mut record = self
            .store
            .load(id)?
            .ok_or_else(|| ServerError::WorkspaceNotFound(id.to_string()))?;

        let (result, changed) = f(&mut record);
        if changed {
            self.store.save(&record)?;
        } else {
            debug!(workspace_id = %id, "no changes to persist");
        }
        Ok(result)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }
}
