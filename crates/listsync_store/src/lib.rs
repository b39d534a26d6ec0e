//! # listsync store
//!
//! Durable storage of workspace documents.
//!
//! Each workspace is stored as one [`WorkspaceRecord`](listsync_protocol::WorkspaceRecord)
//! holding its lists, items and push subscriptions, addressed by workspace id.
//! A save replaces the whole document, so a sync's combined update is
//! atomic by construction.
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral servers
//! - [`FileStore`] - One JSON file per workspace, written via temp file + rename
//!
//! ## Example
//!
//! ```rust
//! use listsync_protocol::{WorkspaceCode, WorkspaceRecord};
//! use listsync_store::{InMemoryStore, WorkspaceStore};
//!
//! let store = InMemoryStore::new();
//! let record = WorkspaceRecord::new("w1", WorkspaceCode::random(), 0);
//! store.save(&record).unwrap();
//! assert_eq!(store.load("w1").unwrap(), Some(record));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::WorkspaceStore;
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
