//! Inspect command implementation.

use listsync_protocol::{Item, Record, Timestamp, WorkspaceCode, WorkspaceRecord};
use listsync_store::{FileStore, StoreResult, WorkspaceStore};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::Path;

/// One-line view of a stored workspace.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    /// Workspace id.
    pub id: String,
    /// Pairing code.
    pub code: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Live lists.
    pub lists: usize,
    /// Live items.
    pub items: usize,
    /// List and item tombstones.
    pub tombstones: usize,
    /// Registered push endpoints.
    pub subscriptions: usize,
    /// Newest `updatedAt` held.
    pub last_change: Option<Timestamp>,
}

impl WorkspaceSummary {
    /// Summarizes a stored workspace.
    pub fn of(record: &WorkspaceRecord) -> Self {
        let lists = record.live_list_count();
        let items = record.live_item_count();
        let last_change = record
            .lists
            .values()
            .map(Record::updated_at)
            .chain(record.items.values().map(Record::updated_at))
            .max();
        Self {
            id: record.id.clone(),
            code: record.code.to_string(),
            created_at: record.created_at,
            lists,
            items,
            tombstones: record.lists.len() + record.items.len() - lists - items,
            subscriptions: record.subscriptions.len(),
            last_change,
        }
    }
}

/// Finds a workspace by id, or by pairing code in any case.
pub fn find_workspace(
    store: &dyn WorkspaceStore,
    key: &str,
) -> StoreResult<Option<WorkspaceRecord>> {
    // Codes are not valid ids for every store, so a failed lookup by id
    // falls through to the code scan.
    if let Ok(Some(record)) = store.load(key) {
        return Ok(Some(record));
    }
    let code = WorkspaceCode::normalize(key);
    Ok(store
        .load_all()?
        .into_iter()
        .find(|record| record.code.as_str() == code))
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    workspace: Option<&str>,
    tombstones: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No data directory at {}", path.display()).into());
    }
    let store = FileStore::open(path)?;

    match workspace {
        Some(key) => {
            let mut record =
                find_workspace(&store, key)?.ok_or_else(|| format!("No workspace {key}"))?;
            if !tombstones {
                record.lists.retain(|_, list| !list.is_deleted());
                record.items.retain(|_, item| !item.is_deleted());
            }
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&record)?),
                _ => print_workspace(&record),
            }
        }
        None => {
            let mut summaries: Vec<_> = store
                .load_all()?
                .iter()
                .map(WorkspaceSummary::of)
                .collect();
            summaries.sort_by_key(|s| s.created_at);
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&summaries)?),
                _ => print_summaries(path, &summaries),
            }
        }
    }

    Ok(())
}

fn print_summaries(path: &Path, summaries: &[WorkspaceSummary]) {
    println!("listsync data directory: {}", path.display());
    println!();
    if summaries.is_empty() {
        println!("No workspaces.");
        return;
    }
    println!(
        "{:<36}  {:<8}  {:>5}  {:>6}  {:>10}  {:>5}",
        "ID", "CODE", "LISTS", "ITEMS", "TOMBSTONES", "PUSH"
    );
    for s in summaries {
        println!(
            "{:<36}  {:<8}  {:>5}  {:>6}  {:>10}  {:>5}",
            s.id, s.code, s.lists, s.items, s.tombstones, s.subscriptions
        );
    }
    println!();
    println!("{} workspace(s)", summaries.len());
}

fn print_workspace(record: &WorkspaceRecord) {
    let summary = WorkspaceSummary::of(record);
    println!("Workspace {}", record.id);
    println!("==========");
    println!("Code:          {}", record.code);
    println!("Created:       {}", record.created_at);
    if let Some(last) = summary.last_change {
        println!("Last change:   {last}");
    }
    println!();

    // Built-in lists only appear in the document once edited, so items are
    // grouped by list id rather than by stored list.
    let mut by_list: BTreeMap<&str, Vec<&Item>> = record
        .lists
        .keys()
        .map(|id| (id.as_str(), Vec::new()))
        .collect();
    for item in record.items.values() {
        by_list.entry(item.list_id.as_str()).or_default().push(item);
    }

    for (list_id, mut items) in by_list {
        match record.lists.get(list_id) {
            Some(list) if list.is_deleted() => println!("{} [{list_id}] (deleted)", list.name),
            Some(list) => println!("{} [{list_id}]", list.name),
            None => println!("[{list_id}]"),
        }
        items.sort_by_key(|i| (i.completed, Reverse(i.created_at)));
        for item in items {
            let check = if item.completed { "x" } else { " " };
            let marker = if item.is_deleted() { " (deleted)" } else { "" };
            println!("  [{check}] {}{marker}", item.text);
        }
    }

    if !record.subscriptions.is_empty() {
        println!();
        println!("Push endpoints:");
        for subscription in &record.subscriptions {
            println!(
                "  {}  {}",
                subscription.device_id, subscription.endpoint.endpoint
            );
        }
    }
}
