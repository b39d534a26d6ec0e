//! Last-write-wins merge of replicated records.
//!
//! The same rule runs on the server (merging a client batch into the stored
//! workspace) and on every client (applying a sync response or a live push),
//! which is what lets independent replicas converge.

use crate::model::{Record, Timestamp};
use std::collections::BTreeMap;

/// Returns true if `incoming` should replace `stored`.
///
/// An absent record is always replaced. Otherwise `incoming` must be strictly
/// newer: equal timestamps keep the stored record, so re-sending a record is
/// a no-op.
pub fn should_replace<R: Record>(stored: Option<&R>, incoming: &R) -> bool {
    match stored {
        None => true,
        Some(stored) => incoming.updated_at() > stored.updated_at(),
    }
}

/// Applies one record. Returns true if it was stored.
pub fn apply<R: Record>(records: &mut BTreeMap<String, R>, incoming: R) -> bool {
    if should_replace(records.get(incoming.id()), &incoming) {
        records.insert(incoming.id().to_string(), incoming);
        true
    } else {
        false
    }
}

/// Applies a batch in order and returns the records that won.
pub fn merge_batch<R, I>(records: &mut BTreeMap<String, R>, incoming: I) -> Vec<R>
where
    R: Record,
    I: IntoIterator<Item = R>,
{
    let mut winners = Vec::new();
    for record in incoming {
        if apply(records, record.clone()) {
            winners.push(record);
        }
    }
    winners
}

/// Returns every record modified after the `since` watermark.
pub fn changed_since<R: Record>(records: &BTreeMap<String, R>, since: Timestamp) -> Vec<R> {
    records
        .values()
        .filter(|r| r.updated_at() > since)
        .cloned()
        .collect()
}

/// Returns the newest `updatedAt` in `records`, if any.
pub fn latest<'a, R, I>(records: I) -> Option<Timestamp>
where
    R: Record + 'a,
    I: IntoIterator<Item = &'a R>,
{
    records.into_iter().map(|r| r.updated_at()).max()
}
