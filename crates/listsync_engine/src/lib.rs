//! # listsync engine
//!
//! Client side of listsync: keeps one device's replica of a workspace in
//! sync with the server.
//!
//! This crate provides:
//! - `SyncAgent`, the per-device state machine and mutation API
//! - `Replica`, the local lists and items with dirty tracking
//! - HTTP and WebSocket transports, plus mocks for testing
//! - Reconnect with bounded exponential backoff
//!
//! ## Model
//!
//! Local writes always succeed and are sent in the background. A sync round
//! posts the records modified since they were last acknowledged together
//! with the watermark, and applies whatever the server returns using the
//! same last-write-wins rule the server applies. The live channel delivers
//! other devices' changes as they happen; anything it misses is picked up by
//! the next sync round.
//!
//! ## Key Invariants
//!
//! - At most one sync round in flight per agent
//! - The watermark only advances when a round succeeds
//! - A record stays dirty until the server has acknowledged that exact version
//! - Built-in lists are never deleted

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod http;
mod replica;
mod state;
mod transport;

pub use config::{AgentConfig, ReconnectPolicy};
pub use error::{SyncError, SyncResult};
pub use http::{HttpTransport, WsConnector};
pub use replica::Replica;
pub use state::{
    ConnectionState, ItemPatch, ListPatch, ReplicaEvent, SkipReason, SyncAgent, SyncOutcome,
    SyncStats,
};
pub use transport::{
    LiveConnector, LiveStream, MockLiveConnector, MockTransport, SyncTransport,
};
