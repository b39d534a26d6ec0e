//! File-based store for persistent storage.

use crate::backend::WorkspaceStore;
use crate::error::{StoreError, StoreResult};
use listsync_protocol::WorkspaceRecord;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const DOCUMENT_EXT: &str = "json";
const TEMP_SUFFIX: &str = ".json.tmp";

/// A directory of workspace documents, one `<id>.json` file each.
///
/// # Durability
///
/// Saves use the write-then-rename pattern:
/// 1. Write the document to `<id>.json.tmp`
/// 2. Sync the temporary file to disk
/// 3. Rename it over `<id>.json`
/// 4. Fsync the directory so the rename itself is durable
///
/// A crash at any point leaves either the old or the new document in
/// place, never a truncated one.
///
/// # Example
///
/// ```no_run
/// use listsync_protocol::{WorkspaceCode, WorkspaceRecord};
/// use listsync_store::{FileStore, WorkspaceStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data")).unwrap();
/// store.save(&WorkspaceRecord::new("w1", WorkspaceCode::random(), 0)).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path a workspace document is stored at.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] for ids that could escape the
    /// store directory.
    pub fn document_path(&self, id: &str) -> StoreResult<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.{DOCUMENT_EXT}")))
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{TEMP_SUFFIX}"))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

/// Ids are UUIDs in practice; anything outside `[A-Za-z0-9_-]` is refused.
fn validate_id(id: &str) -> StoreResult<()> {
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

impl WorkspaceStore for FileStore {
    fn load(&self, id: &str) -> StoreResult<Option<WorkspaceRecord>> {
        let path = self.document_path(id)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: WorkspaceRecord = serde_json::from_slice(&data)?;
        if record.id != id {
            return Err(StoreError::Corrupted(format!(
                "document {} holds workspace {}",
                path.display(),
                record.id
            )));
        }
        Ok(Some(record))
    }

    fn save(&self, record: &WorkspaceRecord) -> StoreResult<()> {
        let path = self.document_path(&record.id)?;
        let temp_path = self.temp_path(&record.id);
        let data = serde_json::to_vec_pretty(record)?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        self.sync_directory()?;

        debug!(workspace_id = %record.id, bytes = data.len(), "saved workspace");
        Ok(())
    }

    fn list_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
