//! Verify command implementation.

use listsync_protocol::{is_builtin_list, Record, WorkspaceRecord};
use listsync_store::{FileStore, WorkspaceStore};
use std::collections::HashMap;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of documents checked.
    pub documents_checked: usize,
    /// Number of documents that loaded cleanly.
    pub valid_documents: usize,
    /// Problems that make a document unusable.
    pub errors: Vec<String>,
    /// Suspicious but harmless findings.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying listsync data at {}", path.display());
    println!();

    if !path.is_dir() {
        return Err(format!("No data directory at {}", path.display()).into());
    }
    let result = verify_store(&FileStore::open(path)?, path)?;

    println!("Documents checked: {}", result.documents_checked);
    println!("Valid documents:   {}", result.valid_documents);
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every document in `store`. `dir` is scanned for leftovers of
/// interrupted writes.
pub fn verify_store(
    store: &dyn WorkspaceStore,
    dir: &Path,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let mut codes: HashMap<String, String> = HashMap::new();

    for id in store.list_ids()? {
        result.documents_checked += 1;
        let record = match store.load(&id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                result.errors.push(format!("{id}: listed but not loadable"));
                continue;
            }
            Err(e) => {
                result.errors.push(format!("{id}: {e}"));
                continue;
            }
        };

        if let Some(other) = codes.insert(record.code.as_str().to_string(), id.clone()) {
            result
                .errors
                .push(format!("{id}: code {} also used by {other}", record.code));
            continue;
        }
        check_document(&record, &mut result);
        result.valid_documents += 1;
    }

    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".tmp") {
            result
                .warnings
                .push(format!("{name}: leftover of an interrupted write"));
        }
    }

    Ok(result)
}

fn check_document(record: &WorkspaceRecord, result: &mut VerifyResult) {
    let id = &record.id;
    for (key, list) in &record.lists {
        if key != &list.id {
            result
                .warnings
                .push(format!("{id}: list stored under {key} has id {}", list.id));
        }
        if list.is_deleted() && is_builtin_list(&list.id) {
            result
                .warnings
                .push(format!("{id}: built-in list {} is marked deleted", list.id));
        }
    }
    for (key, item) in &record.items {
        if key != &item.id {
            result
                .warnings
                .push(format!("{id}: item stored under {key} has id {}", item.id));
        }
        if !item.is_deleted()
            && !is_builtin_list(&item.list_id)
            && !record.lists.contains_key(&item.list_id)
        {
            result
                .warnings
                .push(format!("{id}: item {} belongs to unknown list {}", item.id, item.list_id));
        }
    }
}
