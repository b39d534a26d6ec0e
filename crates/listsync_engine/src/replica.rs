//! Device-local replica of a workspace.

use listsync_protocol::{
    default_lists, lww, ChangeSet, Item, List, Record, SyncRequest, SyncResponse, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lists and items as this device knows them, plus what it still owes the
/// server.
///
/// A record is dirty from the moment it is modified locally until a sync
/// that carried exactly that version succeeds. Remote records are applied
/// with the same last-write-wins rule the server uses.
///
/// The replica is plain data; callers persist it with serde if they want it
/// to survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    lists: BTreeMap<String, List>,
    items: BTreeMap<String, Item>,
    dirty_lists: BTreeSet<String>,
    dirty_items: BTreeSet<String>,
    last_sync_at: Timestamp,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    /// Creates a replica holding only the built-in lists.
    pub fn new() -> Self {
        Self {
            lists: default_lists()
                .into_iter()
                .map(|list| (list.id.clone(), list))
                .collect(),
            items: BTreeMap::new(),
            dirty_lists: BTreeSet::new(),
            dirty_items: BTreeSet::new(),
            last_sync_at: 0,
        }
    }

    /// Watermark: `syncedAt` of the last successful sync.
    pub fn last_sync_at(&self) -> Timestamp {
        self.last_sync_at
    }

    /// Forgets the watermark so the next sync fetches everything.
    pub fn reset_watermark(&mut self) {
        self.last_sync_at = 0;
    }

    /// Marks every record this device has seen modified as dirty.
    ///
    /// Untouched built-in lists (`updatedAt` 0) stay clean.
    pub fn mark_all_dirty(&mut self) {
        self.dirty_lists.extend(
            self.lists
                .values()
                .filter(|l| l.updated_at > 0)
                .map(|l| l.id.clone()),
        );
        self.dirty_items.extend(
            self.items
                .values()
                .filter(|i| i.updated_at > 0)
                .map(|i| i.id.clone()),
        );
    }

    /// Returns a list, tombstones included.
    pub fn list(&self, id: &str) -> Option<&List> {
        self.lists.get(id)
    }

    /// Returns an item, tombstones included.
    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    /// Returns a live list.
    pub fn live_list(&self, id: &str) -> Option<&List> {
        self.lists.get(id).filter(|l| !l.is_deleted())
    }

    /// Returns a live item.
    pub fn live_item(&self, id: &str) -> Option<&Item> {
        self.items.get(id).filter(|i| !i.is_deleted())
    }

    /// Live lists sorted by `order`.
    pub fn lists(&self) -> Vec<List> {
        let mut lists: Vec<List> = self
            .lists
            .values()
            .filter(|l| !l.is_deleted())
            .cloned()
            .collect();
        lists.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        lists
    }

    /// Live items of one list: incomplete first, then newest first.
    pub fn items_in(&self, list_id: &str) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .items
            .values()
            .filter(|i| i.list_id == list_id && !i.is_deleted())
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.completed
                .cmp(&b.completed)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        items
    }

    /// Live items of every list.
    pub fn live_items(&self) -> impl Iterator<Item = &Item> {
        self.items.values().filter(|i| !i.is_deleted())
    }

    /// Stores a locally modified list and marks it dirty.
    pub fn put_list(&mut self, list: List) {
        self.dirty_lists.insert(list.id.clone());
        self.lists.insert(list.id.clone(), list);
    }

    /// Stores a locally modified item and marks it dirty.
    pub fn put_item(&mut self, item: Item) {
        self.dirty_items.insert(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    /// Number of records waiting to be sent.
    pub fn pending_count(&self) -> usize {
        self.dirty_lists.len() + self.dirty_items.len()
    }

    /// Builds the next sync request from the dirty records.
    pub fn pending_request(&self, device_id: &str) -> SyncRequest {
        let lists = self
            .dirty_lists
            .iter()
            .filter_map(|id| self.lists.get(id))
            .cloned()
            .collect();
        let items = self
            .dirty_items
            .iter()
            .filter_map(|id| self.items.get(id))
            .cloned()
            .collect();
        SyncRequest::new(device_id, self.last_sync_at)
            .with_lists(lists)
            .with_items(items)
    }

    /// Applies remote records. Returns the ones that won.
    pub fn apply_remote(&mut self, lists: Vec<List>, items: Vec<Item>) -> ChangeSet {
        ChangeSet {
            lists: lww::merge_batch(&mut self.lists, lists),
            items: lww::merge_batch(&mut self.items, items),
        }
    }

    /// Finishes a successful sync of `sent`.
    ///
    /// Records still holding the version that was sent are no longer dirty;
    /// records modified again while the request was in flight stay dirty.
    /// The response is then applied and the watermark advanced.
    pub fn complete_sync(&mut self, sent: &SyncRequest, response: SyncResponse) -> ChangeSet {
        for list in &sent.lists {
            if self.lists.get(&list.id).map(Record::updated_at) == Some(list.updated_at) {
                self.dirty_lists.remove(&list.id);
            }
        }
        for item in &sent.items {
            if self.items.get(&item.id).map(Record::updated_at) == Some(item.updated_at) {
                self.dirty_items.remove(&item.id);
            }
        }

        let applied = self.apply_remote(response.lists, response.items);
        self.last_sync_at = response.synced_at;
        applied
    }

    /// Newest `updatedAt` held, tombstones included.
    pub fn newest_stamp(&self) -> Option<Timestamp> {
        let lists = lww::latest(self.lists.values());
        let items = lww::latest(self.items.values());
        lists.max(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, text: &str, updated_at: Timestamp) -> Item {
        let mut item = Item::new(id, "inbox", text, 1);
        item.updated_at = updated_at;
        item
    }

    fn response(items: Vec<Item>, synced_at: Timestamp) -> SyncResponse {
        SyncResponse {
            lists: vec![],
            items,
            synced_at,
        }
    }

    #[test]
    fn starts_with_builtin_lists() {
        let replica = Replica::new();
        let ids: Vec<_> = replica.lists().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["inbox", "todo", "shopping", "ideas"]);
        assert_eq!(replica.pending_count(), 0);
    }

    #[test]
    fn local_edits_are_pending() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 10));

        let request = replica.pending_request("phone");
        assert_eq!(request.device_id, "phone");
        assert_eq!(request.last_sync_at, 0);
        assert_eq!(request.items.len(), 1);
        assert!(request.lists.is_empty());
    }

    #[test]
    fn successful_sync_clears_dirty_and_advances_watermark() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 10));
        let sent = replica.pending_request("phone");

        replica.complete_sync(&sent, response(vec![item("i1", "milk", 10)], 500));
        assert_eq!(replica.pending_count(), 0);
        assert_eq!(replica.last_sync_at(), 500);
    }

    #[test]
    fn edit_during_flight_stays_dirty() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 10));
        let sent = replica.pending_request("phone");

        replica.put_item(item("i1", "oat milk", 20));
        replica.complete_sync(&sent, response(vec![], 500));

        assert_eq!(replica.pending_count(), 1);
        assert_eq!(replica.pending_request("phone").items[0].text, "oat milk");
    }

    #[test]
    fn mark_all_dirty_requeues_synced_records() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 10));
        let sent = replica.pending_request("phone");
        replica.complete_sync(&sent, response(vec![item("i2", "eggs", 15)], 500));
        assert_eq!(replica.pending_count(), 0);

        replica.mark_all_dirty();

        let request = replica.pending_request("phone");
        let ids: Vec<_> = request.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i1", "i2"]);
        assert!(request.lists.is_empty(), "untouched built-in lists stay clean");
    }

    #[test]
    fn remote_winner_is_applied() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 10));

        let applied =
            replica.apply_remote(vec![], vec![item("i1", "bread", 20), item("i2", "eggs", 5)]);
        assert_eq!(applied.items.len(), 2);
        assert_eq!(replica.item("i1").unwrap().text, "bread");
    }

    #[test]
    fn stale_remote_is_ignored() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 20));
        let applied = replica.apply_remote(vec![], vec![item("i1", "old", 10)]);
        assert!(applied.is_empty());
        assert_eq!(replica.item("i1").unwrap().text, "milk");
    }

    #[test]
    fn items_sorted_incomplete_then_newest() {
        let mut replica = Replica::new();
        let mut done = Item::new("a", "inbox", "done", 300);
        done.completed = true;
        replica.put_item(done);
        replica.put_item(Item::new("b", "inbox", "old", 100));
        replica.put_item(Item::new("c", "inbox", "new", 200));
        let mut gone = Item::new("d", "inbox", "gone", 400);
        gone.deleted_at = Some(400);
        replica.put_item(gone);

        let texts: Vec<_> = replica.items_in("inbox").into_iter().map(|i| i.text).collect();
        assert_eq!(texts, vec!["new", "old", "done"]);
    }

    #[test]
    fn serde_snapshot() {
        let mut replica = Replica::new();
        replica.put_item(item("i1", "milk", 10));
        let json = serde_json::to_string(&replica).unwrap();
        let restored: Replica = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, replica);
    }

    #[test]
    fn newest_stamp_covers_tombstones() {
        let mut replica = Replica::new();
        let mut gone = item("i1", "x", 10);
        gone.deleted_at = Some(99);
        gone.updated_at = 99;
        replica.put_item(gone);
        assert_eq!(replica.newest_stamp(), Some(99));
    }
}
