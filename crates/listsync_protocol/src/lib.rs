//! # listsync protocol
//!
//! Record model and wire types shared by the listsync server and clients.
//!
//! This crate provides:
//! - `List`, `Item` and `PushSubscription` records
//! - `WorkspaceRecord`, the durable per-workspace document
//! - Request/response messages and the live `sync` push message
//! - The last-write-wins rule used by both sides of a sync
//! - Workspace pairing codes
//! - A monotonic millisecond clock for `updatedAt` stamps
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Conflict resolution
//!
//! Every record carries `updatedAt`. A record replaces a stored record with
//! the same id only when its `updatedAt` is strictly greater, so equal
//! timestamps keep the stored copy and retransmission is a no-op.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod code;
mod error;
pub mod lww;
mod messages;
mod model;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use code::{WorkspaceCode, CODE_ALPHABET, CODE_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChangeSet, ErrorBody, LiveMessage, NotificationPayload, RegisterPushRequest,
    RegisterPushResponse, SyncRequest, SyncResponse, WorkspaceInfo,
};
pub use model::{
    default_lists, is_builtin_list, Item, List, PushEndpoint, PushSubscription, Record, Timestamp,
    WorkspaceRecord, BUILTIN_LIST_IDS, INBOX_LIST_ID,
};
