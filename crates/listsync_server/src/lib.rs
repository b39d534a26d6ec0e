//! # listsync server
//!
//! Workspace sync server for listsync.
//!
//! This crate provides:
//! - Workspace creation and pairing-code lookup
//! - The merge endpoint (last-write-wins per record, tombstones included)
//! - Live fan-out of merged changes over WebSockets
//! - Fallback notifications to registered push endpoints
//! - Durable per-workspace documents via `listsync_store`
//!
//! # Architecture
//!
//! Every workspace is one document. A sync request is handled as a single
//! read-merge-persist cycle under that workspace's lock, so concurrent
//! syncs against the same workspace never lose updates while different
//! workspaces proceed independently.
//!
//! Fan-out and notifications happen after the merge is durable and never
//! affect the sync response. A missed live message is repaired by the next
//! sync round of the device that missed it.
//!
//! # Protocol
//!
//! 1. A device creates a workspace, or resolves another device's code
//! 2. It opens `/ws/{id}` to receive other devices' changes
//! 3. It posts its dirty records with its watermark to `/api/sync/{id}`
//! 4. The response carries everything newer than the watermark plus a new
//!    watermark

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod directory;
mod error;
mod fanout;
pub mod http;
mod merge;
mod notify;
mod server;

pub use config::ServerConfig;
pub use directory::WorkspaceDirectory;
pub use error::{ServerError, ServerResult};
pub use fanout::{ConnectionId, LiveHub, LiveSender, LIVE_QUEUE_CAPACITY};
pub use merge::{MergeEngine, MergeOutcome};
pub use notify::{DeliveryError, Notifier, NotifyReport, PushDelivery, WebhookDelivery};
pub use server::SyncServer;
